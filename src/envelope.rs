//! The signed, optionally encrypted wire format of session and authentication cookies.
//!
//! ```text
//! HEX_HMAC_SHA512 | [TOKEN |] RFC3339_EXPIRY # k1:v1&k2:v2&...
//! ```
//!
//! Keys and values are percent-encoded. Decoding never fails loudly: any anomaly yields [`Absent`].

use crate::crypto::{self, Cipher};
use crate::{Absent, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Separates the fields of the envelope prefix.
pub const FIELD_DELIMITER: char = '|';
/// Separates the prefix from the data section.
pub const DATA_DELIMITER: char = '#';
/// Separates key/value pairs in the data section.
pub const PAIR_SEPARATOR: char = '&';
/// Separates a key from its value.
pub const KEY_VALUE_SEPARATOR: char = ':';

/// The decoded content of a valid envelope.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Envelope {
    /// The key/value pairs.
    pub values: BTreeMap<String, String>,
    /// The authenticity token, present in session envelopes only.
    pub token: Option<String>,
    /// The instant after which the envelope is no longer accepted.
    pub expiry: DateTime<Utc>,
}

/// Encodes and decodes envelopes with one secret and an optional cipher.
///
/// The signature also covers the purpose of the codec, so an envelope issued for one cookie
/// does not verify as another cookie signed with the same secret.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    purpose: String,
    secret: String,
    cipher: Option<Cipher>,
}

impl EnvelopeCodec {
    /// Create a codec that signs with `secret` and encrypts with `cipher`, if given.
    pub fn new(secret: impl Into<String>, cipher: Option<Cipher>) -> Self {
        Self {
            purpose: String::new(),
            secret: secret.into(),
            cipher,
        }
    }

    /// Binds the signatures of this codec to `purpose`, usually the cookie name.
    ///
    /// ```rust
    /// # use std::collections::BTreeMap;
    /// # use chrono::{Duration, Utc};
    /// # use request_lifecycle::EnvelopeCodec;
    /// let session = EnvelopeCodec::new("0123456789abcdef", None).purpose("session");
    /// let authentication = EnvelopeCodec::new("0123456789abcdef", None).purpose("auth");
    ///
    /// let raw = session
    ///     .encode(&BTreeMap::new(), Some("token"), Utc::now() + Duration::hours(1))
    ///     .unwrap();
    /// assert!(session.decode(&raw, Utc::now()).is_ok());
    /// assert!(authentication.decode(&raw, Utc::now()).is_err());
    /// ```
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// Serialize and sign the given envelope parts.
    ///
    /// Fails only if a cryptographic primitive fails.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::collections::BTreeMap;
    /// # use chrono::{Duration, Utc};
    /// # use request_lifecycle::EnvelopeCodec;
    /// let codec = EnvelopeCodec::new("0123456789abcdef", None);
    /// let values = BTreeMap::from([("user".to_owned(), "alice".to_owned())]);
    /// let expiry = Utc::now() + Duration::hours(1);
    ///
    /// let raw = codec.encode(&values, Some("token"), expiry).unwrap();
    /// let envelope = codec.decode(&raw, Utc::now()).unwrap();
    /// assert_eq!(envelope.values, values);
    /// assert_eq!(envelope.token.as_deref(), Some("token"));
    /// assert_eq!(envelope.expiry, expiry);
    /// ```
    pub fn encode(
        &self,
        values: &BTreeMap<String, String>,
        token: Option<&str>,
        expiry: DateTime<Utc>,
    ) -> Result<String> {
        let joined = join(values);
        let expiry = format_expiry(expiry);
        let signature = crypto::sign(&self.secret, &self.signed_message(&joined, token, &expiry))?;

        let mut assembled = signature;
        assembled.push(FIELD_DELIMITER);
        if let Some(token) = token {
            assembled.push_str(token);
            assembled.push(FIELD_DELIMITER);
        }
        assembled.push_str(&expiry);
        assembled.push(DATA_DELIMITER);
        assembled.push_str(&joined);

        match &self.cipher {
            Some(cipher) => cipher.encrypt(&assembled),
            None => Ok(assembled),
        }
    }

    /// Verify and parse `raw`.
    ///
    /// Returns [`Absent`] if the value cannot be decrypted, is malformed, is expired at `now`,
    /// or its signature does not match.
    pub fn decode(&self, raw: &str, now: DateTime<Utc>) -> std::result::Result<Envelope, Absent> {
        let decrypted;
        let raw = match &self.cipher {
            Some(cipher) => {
                decrypted = cipher.decrypt(raw).ok_or(Absent)?;
                decrypted.as_str()
            }
            None => raw,
        };

        let (prefix, joined) = raw.split_once(DATA_DELIMITER).ok_or(Absent)?;
        let fields: Vec<&str> = prefix.split(FIELD_DELIMITER).collect();
        let (signature, token, expiry) = match fields.as_slice() {
            [signature, expiry] => (*signature, None, *expiry),
            [signature, token, expiry] if !token.is_empty() => (*signature, Some(*token), *expiry),
            _ => return Err(Absent),
        };
        if signature.is_empty() {
            return Err(Absent);
        }

        let parsed_expiry = DateTime::parse_from_rfc3339(expiry)
            .map_err(|_| Absent)?
            .with_timezone(&Utc);
        if parsed_expiry <= now {
            return Err(Absent);
        }

        let message = self.signed_message(joined, token, expiry);
        match crypto::verify(&self.secret, &message, signature) {
            Ok(true) => {}
            Ok(false) => return Err(Absent),
            Err(error) => {
                log::error!("Failed to verify cookie signature: {error}");
                return Err(Absent);
            }
        }

        Ok(Envelope {
            values: split(joined).ok_or(Absent)?,
            token: token.map(str::to_owned),
            expiry: parsed_expiry,
        })
    }

    fn signed_message(&self, joined: &str, token: Option<&str>, expiry: &str) -> String {
        let mut message =
            String::with_capacity(self.purpose.len() + joined.len() + expiry.len() + 33);
        if !self.purpose.is_empty() {
            message.push_str(&self.purpose);
            message.push(FIELD_DELIMITER);
        }
        message.push_str(joined);
        if let Some(token) = token {
            message.push_str(token);
        }
        message.push_str(expiry);
        message
    }
}

fn format_expiry(expiry: DateTime<Utc>) -> String {
    expiry.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Join `values` as percent-encoded `key:value` pairs separated by `&`.
pub(crate) fn join(values: &BTreeMap<String, String>) -> String {
    let mut joined = String::new();
    for (key, value) in values {
        if !joined.is_empty() {
            joined.push(PAIR_SEPARATOR);
        }
        joined.push_str(&urlencoding::encode(key));
        joined.push(KEY_VALUE_SEPARATOR);
        joined.push_str(&urlencoding::encode(value));
    }
    joined
}

/// Inverse of [`join`]. Returns `None` on any malformed pair.
pub(crate) fn split(joined: &str) -> Option<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    if joined.is_empty() {
        return Some(values);
    }

    for pair in joined.split(PAIR_SEPARATOR) {
        let (key, value) = pair.split_once(KEY_VALUE_SEPARATOR)?;
        let key = urlencoding::decode(key).ok()?.into_owned();
        let value = urlencoding::decode(value).ok()?.into_owned();
        values.insert(key, value);
    }
    Some(values)
}
