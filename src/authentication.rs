use crate::envelope::Envelope;
use crate::LoginLock;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

const SUBJECT: &str = "subject";
const REMEMBER: &str = "remember";
const TWO_FACTOR: &str = "twoFactor";
const PROVIDER: &str = "provider";
const EXTERNAL_ID: &str = "externalId";
const EXTERNAL_NAME: &str = "externalName";

/// An identity established by a third party, e.g. an OAuth provider.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExternalIdentity {
    /// The provider that vouched for the identity.
    pub provider: String,
    /// The identifier at the provider.
    pub id: String,
    /// The display name at the provider.
    pub name: String,
}

/// The identity of the logged-in subject, carried in the signed authentication cookie.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::Authentication;
/// let mut authentication = Authentication::new(chrono::Utc::now());
/// assert!(!authentication.is_valid());
/// authentication.login("alice").remember_me(true);
/// assert!(authentication.is_valid());
/// assert_eq!(authentication.subject(), Some("alice"));
/// authentication.logout();
/// assert!(authentication.is_logout());
/// ```
#[derive(Debug, Clone)]
pub struct Authentication {
    subject: Option<String>,
    expiry: DateTime<Utc>,
    remember: bool,
    two_factor: bool,
    external: Option<ExternalIdentity>,
    logout: bool,
    changed: bool,
}

impl Authentication {
    /// Create an empty authentication that would expire at `expiry` once a subject logs in.
    pub fn new(expiry: DateTime<Utc>) -> Self {
        Self {
            subject: None,
            expiry,
            remember: false,
            two_factor: false,
            external: None,
            logout: false,
            changed: false,
        }
    }

    /// Create an authentication from a decoded authentication cookie.
    ///
    /// Returns `None` if the envelope carries an authenticity token, as only session
    /// envelopes have one.
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        let Envelope {
            mut values,
            token,
            expiry,
        } = envelope;
        if token.is_some() {
            return None;
        }
        let flag = |values: &BTreeMap<String, String>, key: &str| {
            values.get(key).map(|value| value == "true").unwrap_or(false)
        };

        let external = match (
            values.remove(PROVIDER),
            values.remove(EXTERNAL_ID),
            values.remove(EXTERNAL_NAME),
        ) {
            (Some(provider), Some(id), name) => Some(ExternalIdentity {
                provider,
                id,
                name: name.unwrap_or_default(),
            }),
            _ => None,
        };

        Some(Self {
            remember: flag(&values, REMEMBER),
            two_factor: flag(&values, TWO_FACTOR),
            subject: values.remove(SUBJECT).filter(|subject| !subject.trim().is_empty()),
            expiry,
            external,
            logout: false,
            changed: false,
        })
    }

    /// The values stored in the authentication cookie.
    pub fn to_values(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        if let Some(subject) = &self.subject {
            values.insert(SUBJECT.to_owned(), subject.clone());
        }
        values.insert(REMEMBER.to_owned(), self.remember.to_string());
        values.insert(TWO_FACTOR.to_owned(), self.two_factor.to_string());
        if let Some(external) = &self.external {
            values.insert(PROVIDER.to_owned(), external.provider.clone());
            values.insert(EXTERNAL_ID.to_owned(), external.id.clone());
            values.insert(EXTERNAL_NAME.to_owned(), external.name.clone());
        }
        values
    }

    /// Logs in `subject`. Call [`Authentication::valid_login`] before.
    pub fn login(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = Some(subject.into());
        self.logout = false;
        self.changed = true;
        self
    }

    /// Attaches an identity established by a third-party provider.
    pub fn with_external_identity(&mut self, identity: ExternalIdentity) -> &mut Self {
        self.external = Some(identity);
        self.logout = false;
        self.changed = true;
        self
    }

    /// Keeps the subject logged in for the remember-me duration.
    pub fn remember_me(&mut self, remember: bool) -> &mut Self {
        self.remember = remember;
        self.changed = true;
        self
    }

    /// Marks whether the subject still has to pass a second factor.
    pub fn two_factor_authentication(&mut self, two_factor: bool) -> &mut Self {
        self.two_factor = two_factor;
        self.changed = true;
        self
    }

    /// Logs out the current subject; the authentication cookie is removed from the client.
    pub fn logout(&mut self) {
        self.logout = true;
    }

    /// Checks the credentials of `subject` against the lockout counter.
    ///
    /// A locked subject is refused without calling `verify`. A failed verification is counted,
    /// a successful one resets the counter.
    pub fn valid_login(
        &self,
        lock: &LoginLock,
        subject: &str,
        verify: impl FnOnce() -> anyhow::Result<bool>,
    ) -> anyhow::Result<bool> {
        if lock.is_locked(subject) {
            log::warn!("Refusing login of locked subject {subject}");
            return Ok(false);
        }

        if verify()? {
            lock.reset(subject);
            Ok(true)
        } else {
            let failures = lock.record_failure(subject);
            log::debug!("Failed login of {subject}, {failures} failed attempts");
            Ok(false)
        }
    }

    /// The logged-in subject, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// The third-party identity, if any.
    pub fn external_identity(&self) -> Option<&ExternalIdentity> {
        self.external.as_ref()
    }

    /// The expiry timestamp.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub(crate) fn set_expiry(&mut self, expiry: DateTime<Utc>) {
        self.expiry = expiry;
    }

    /// Returns true if the subject asked to stay logged in.
    pub fn is_remember_me(&self) -> bool {
        self.remember
    }

    /// Returns true if a second factor is still required.
    pub fn is_two_factor(&self) -> bool {
        self.two_factor
    }

    /// Returns true if the subject logged out during this request.
    pub fn is_logout(&self) -> bool {
        self.logout
    }

    /// Returns true if a subject or an external identity is present.
    pub fn is_valid(&self) -> bool {
        self.subject
            .as_deref()
            .map(|subject| !subject.trim().is_empty())
            .unwrap_or(false)
            || self.external.is_some()
    }

    /// Returns true if the authentication was modified during this request.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}
