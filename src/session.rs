use crate::envelope::Envelope;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Characters that may not appear in session or flash keys and values.
pub(crate) const RESERVED_CHARACTERS: [char; 4] = [' ', '|', ':', '&'];

pub(crate) fn contains_reserved(value: &str) -> bool {
    value.contains(&RESERVED_CHARACTERS[..])
}

/// A session with a client.
///
/// The session is owned by exactly one request. It is either decoded from the session cookie,
/// or freshly created with a new authenticity token when no valid cookie was sent.
/// Changes are tracked automatically: whenever a value is put or removed, the session is marked as changed.
///
/// A session loaded from a cookie and left unchanged is not written back to the client.
/// A new session is always written back, as the client needs its authenticity token.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    values: BTreeMap<String, String>,
    authenticity_token: String,
    expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum SessionState {
    /// The session was created for this request and not written to.
    NewUnchanged,
    /// The session was created for this request and written to.
    NewChanged,
    /// The session was decoded from the cookie and not written to.
    Unchanged,
    /// The session was decoded from the cookie and written to.
    Changed,
    /// The session was cleared, the cookie is removed from the client.
    Invalidated,
}

/// What should happen to a client cookie after the request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CookieCommand<T> {
    /// Set the cookie to an encoding of the given state.
    Set(T),
    /// Remove the cookie from the client.
    Clear,
    /// Leave the client cookie as it is.
    DoNothing,
}

impl Session {
    /// Create a new, empty session with the given authenticity token, expiring at `expiry`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use request_lifecycle::Session;
    /// let session = Session::new("token".to_owned(), chrono::Utc::now());
    /// assert!(session.is_new());
    /// assert!(!session.has_content());
    /// assert_eq!(session.authenticity_token(), "token");
    /// ```
    pub fn new(authenticity_token: String, expiry: DateTime<Utc>) -> Self {
        Self {
            state: SessionState::NewUnchanged,
            values: BTreeMap::new(),
            authenticity_token,
            expiry,
        }
    }

    /// Create a session from a decoded session cookie.
    ///
    /// Returns `None` if the envelope carries no authenticity token, as only authentication
    /// envelopes lack one.
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        Some(Self {
            state: SessionState::Unchanged,
            values: envelope.values,
            authenticity_token: envelope.token?,
            expiry: envelope.expiry,
        })
    }

    /// Retrieves a value from the session.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Adds a value to the session, overwriting an existing value.
    ///
    /// Keys and values containing spaces, `|`, `:` or `&` are rejected,
    /// in which case the session is left untouched and `false` is returned.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use request_lifecycle::Session;
    /// let mut session = Session::new("token".to_owned(), chrono::Utc::now());
    /// assert!(session.put("user", "alice"));
    /// assert!(!session.put("greeting", "hello world"));
    /// assert_eq!(session.get("user"), Some("alice"));
    /// assert_eq!(session.get("greeting"), None);
    /// assert!(session.is_changed());
    /// ```
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let (key, value) = (key.into(), value.into());
        if contains_reserved(&key) || contains_reserved(&value) {
            log::warn!("Session key or value can not contain the following characters: spaces, |, & or :");
            return false;
        }

        self.change();
        self.values.insert(key, value);
        true
    }

    /// Removes a value from the session, returning it if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.change();
        self.values.remove(key)
    }

    /// Clears the complete session and removes the session cookie from the client.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use request_lifecycle::Session;
    /// let mut session = Session::new("token".to_owned(), chrono::Utc::now());
    /// session.put("user", "alice");
    /// session.clear();
    /// assert!(session.is_invalidated());
    /// assert!(!session.has_content());
    /// ```
    pub fn clear(&mut self) {
        self.values.clear();
        self.state = SessionState::Invalidated;
    }

    /// All values of the session.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Returns true if the session has at least one entry.
    pub fn has_content(&self) -> bool {
        !self.values.is_empty()
    }

    /// The authenticity token of this session.
    pub fn authenticity_token(&self) -> &str {
        &self.authenticity_token
    }

    /// The expiry timestamp of this session.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// Sets this session to expire `ttl` after `now`, marking it as changed.
    /// A `ttl` beyond the representable range expires the session at `now`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::time::Duration;
    /// # use request_lifecycle::Session;
    /// let now = chrono::Utc::now();
    /// let mut session = Session::new("token".to_owned(), now);
    ///
    /// session.expire_in(now, Duration::from_secs(60));
    /// assert_eq!(session.expiry(), now + chrono::Duration::seconds(60));
    ///
    /// session.expire_in(now, Duration::from_secs(u64::MAX));
    /// assert_eq!(session.expiry(), now);
    /// ```
    pub fn expire_in(&mut self, now: DateTime<Utc>, ttl: std::time::Duration) {
        self.change();
        self.expiry = Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(now);
    }

    /// Returns true if the session was created for this request.
    pub fn is_new(&self) -> bool {
        matches!(
            self.state,
            SessionState::NewUnchanged | SessionState::NewChanged
        )
    }

    /// Returns true if the session was written to during this request.
    pub fn is_changed(&self) -> bool {
        matches!(self.state, SessionState::NewChanged | SessionState::Changed)
    }

    /// Returns true if the session was cleared.
    pub fn is_invalidated(&self) -> bool {
        self.state == SessionState::Invalidated
    }

    /// Decide how the session cookie has to be updated at the end of the request.
    pub fn cookie_command(&self) -> CookieCommand<&Self> {
        match self.state {
            SessionState::NewUnchanged | SessionState::NewChanged | SessionState::Changed => {
                CookieCommand::Set(self)
            }
            SessionState::Unchanged => CookieCommand::DoNothing,
            SessionState::Invalidated => CookieCommand::Clear,
        }
    }

    fn change(&mut self) {
        self.state = match self.state {
            SessionState::NewUnchanged | SessionState::NewChanged => SessionState::NewChanged,
            SessionState::Unchanged | SessionState::Changed => SessionState::Changed,
            // Writing to a cleared session starts a new one under the same token.
            SessionState::Invalidated => SessionState::NewChanged,
        };
    }
}
