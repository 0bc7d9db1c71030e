use crate::envelope;
use crate::session::contains_reserved;
use std::collections::BTreeMap;

const ERROR: &str = "error";
const WARNING: &str = "warning";
const SUCCESS: &str = "success";

/// One-shot messages that survive exactly one redirect.
///
/// Values sent by the client are readable during this request and are discarded afterwards.
/// Values put during this request are sent to the client in the flash cookie, unless the
/// request received a flash: a discarded flash always clears the cookie.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::Flash;
/// let mut flash = Flash::new();
/// flash.set_success("done");
/// assert_eq!(flash.get("success"), Some("done"));
///
/// let next = Flash::from_cookie(&flash.encode()).unwrap();
/// assert_eq!(next.get("success"), Some("done"));
/// assert!(next.is_discard());
/// assert_eq!(next.encode(), "");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Flash {
    values: BTreeMap<String, String>,
    outgoing: BTreeMap<String, String>,
    discard: bool,
}

impl Flash {
    /// Create an empty flash.
    pub fn new() -> Self {
        Default::default()
    }

    /// Parse the unsigned `key:value&key:value` flash cookie.
    /// The parsed values are marked for discard.
    ///
    /// Returns `None` if the cookie is malformed.
    pub fn from_cookie(value: &str) -> Option<Self> {
        let values = envelope::split(value)?;
        Some(Self {
            values,
            outgoing: BTreeMap::new(),
            discard: true,
        })
    }

    /// Sets the message available with the key `error`.
    pub fn set_error(&mut self, message: impl Into<String>) -> bool {
        self.put(ERROR, message)
    }

    /// Sets the message available with the key `warning`.
    pub fn set_warning(&mut self, message: impl Into<String>) -> bool {
        self.put(WARNING, message)
    }

    /// Sets the message available with the key `success`.
    pub fn set_success(&mut self, message: impl Into<String>) -> bool {
        self.put(SUCCESS, message)
    }

    /// Adds a value with the given key.
    ///
    /// Keys and values containing spaces, `|`, `:` or `&` are rejected and `false` is returned.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let (key, value) = (key.into(), value.into());
        if contains_reserved(&key) || contains_reserved(&value) {
            log::warn!("Flash key or value can not contain the following characters: spaces, |, & or :");
            return false;
        }

        self.values.insert(key.clone(), value.clone());
        self.outgoing.insert(key, value);
        true
    }

    /// Retrieves a value, either received from the client or put during this request.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// All readable values.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Returns true if the flash holds any readable value.
    pub fn has_content(&self) -> bool {
        !self.values.is_empty()
    }

    /// Returns true if values were put during this request.
    pub fn has_new_content(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Returns true if the flash cookie is cleared after this request.
    pub fn is_discard(&self) -> bool {
        self.discard
    }

    /// The outgoing cookie value, holding only the values put during this request.
    pub fn encode(&self) -> String {
        envelope::join(&self.outgoing)
    }
}
