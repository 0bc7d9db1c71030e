use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;

const APPLICATION_SECRET_MIN_LENGTH: usize = 16;

/// An opaque key/value source the configuration is read from.
///
/// The loader behind it (files, environment, ...) is not part of this crate.
pub trait ConfigSource {
    /// Returns the raw value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// The mode the application runs in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    /// Development: error pages include the error chain.
    Dev,
    /// Test.
    Test,
    /// Production.
    Prod,
}

/// Settings of one signed cookie (session or authentication).
#[derive(Clone)]
pub struct CookieSettings {
    /// The cookie name.
    pub name: String,
    /// How long a freshly issued cookie stays valid.
    pub expires: Duration,
    /// The HMAC secret.
    pub secret: String,
    /// Whether the envelope is encrypted.
    pub encrypt: bool,
}

impl Debug for CookieSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSettings")
            .field("name", &self.name)
            .field("expires", &self.expires)
            .field("secret", &"<redacted>")
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

/// A validated snapshot of all settings the request lifecycle needs.
#[derive(Clone)]
pub struct Config {
    /// The application mode.
    pub mode: Mode,
    /// The fallback language when the request does not name one.
    pub language: String,
    /// Maximum number of requests processed concurrently.
    pub workers: usize,
    /// Key material for cookie encryption.
    pub encryption_key: String,
    /// The session cookie.
    pub session: CookieSettings,
    /// The authentication cookie.
    pub authentication: CookieSettings,
    /// Expiry of an authentication cookie with remember-me set.
    pub remember_expires: Duration,
    /// The flash cookie name.
    pub flash_cookie_name: String,
    /// The language cookie name.
    pub language_cookie_name: String,
    /// Whether cookies are marked `Secure`.
    pub cookie_secure: bool,
    /// Where unauthenticated requests are redirected to.
    pub login_redirect: Option<String>,
    /// Where requests pending a second factor are redirected to.
    pub mfa_redirect: Option<String>,
    /// Failed logins after which a subject is locked out.
    pub authentication_lock: u32,
}

impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mode", &self.mode)
            .field("language", &self.language)
            .field("workers", &self.workers)
            .field("session", &self.session)
            .field("authentication", &self.authentication)
            .field("remember_expires", &self.remember_expires)
            .field("flash_cookie_name", &self.flash_cookie_name)
            .field("language_cookie_name", &self.language_cookie_name)
            .field("cookie_secure", &self.cookie_secure)
            .field("login_redirect", &self.login_redirect)
            .field("mfa_redirect", &self.mfa_redirect)
            .field("authentication_lock", &self.authentication_lock)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Reads and validates all settings from `source`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::collections::HashMap;
    /// # use request_lifecycle::{Config, Mode};
    /// let mut source = HashMap::new();
    /// source.insert("application.secret".to_owned(), "a-secret-of-at-least-16-chars".to_owned());
    /// source.insert("application.mode".to_owned(), "dev".to_owned());
    /// let config = Config::from_source(&source).unwrap();
    /// assert_eq!(config.mode, Mode::Dev);
    /// assert_eq!(config.session.name, "lifecycle-session");
    /// assert_eq!(config.session.expires.as_secs(), 86400);
    /// ```
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let secret = source
            .get("application.secret")
            .ok_or_else(|| Error::config("application.secret", "is required"))?;
        if secret.len() < APPLICATION_SECRET_MIN_LENGTH {
            return Err(Error::config(
                "application.secret",
                format!("must have at least {APPLICATION_SECRET_MIN_LENGTH} characters"),
            ));
        }

        let mode = match source.get("application.mode").as_deref() {
            None | Some("prod") => Mode::Prod,
            Some("dev") => Mode::Dev,
            Some("test") => Mode::Test,
            Some(other) => {
                return Err(Error::config(
                    "application.mode",
                    format!("unknown mode `{other}`"),
                ))
            }
        };

        let workers = parse(source, "application.workers", 32usize)?;
        if workers == 0 {
            return Err(Error::config("application.workers", "must be positive"));
        }

        Ok(Self {
            mode,
            language: string(source, "application.language", "en"),
            workers,
            encryption_key: source
                .get("application.encryption.key")
                .unwrap_or_else(|| secret.clone()),
            session: CookieSettings {
                name: string(source, "session.cookie.name", "lifecycle-session"),
                expires: Duration::from_secs(parse(source, "session.cookie.expires", 86400)?),
                secret: source
                    .get("session.cookie.secret")
                    .unwrap_or_else(|| secret.clone()),
                encrypt: parse(source, "session.cookie.encryption", false)?,
            },
            authentication: CookieSettings {
                name: string(source, "authentication.cookie.name", "lifecycle-auth"),
                expires: Duration::from_secs(parse(
                    source,
                    "authentication.cookie.expires",
                    3600,
                )?),
                secret: source
                    .get("authentication.cookie.secret")
                    .unwrap_or_else(|| secret.clone()),
                encrypt: parse(source, "authentication.cookie.encryption", false)?,
            },
            remember_expires: Duration::from_secs(parse(
                source,
                "authentication.cookie.remember.expires",
                1_209_600,
            )?),
            flash_cookie_name: string(source, "flash.cookie.name", "lifecycle-flash"),
            language_cookie_name: string(source, "i18n.cookie.name", "lifecycle-language"),
            cookie_secure: parse(source, "cookie.secure", false)?,
            login_redirect: non_blank(source, "authentication.redirect.login"),
            mfa_redirect: non_blank(source, "authentication.redirect.mfa"),
            authentication_lock: parse(source, "authentication.lock", 10)?,
        })
    }

    /// Returns true if the application runs in development mode.
    pub fn is_dev(&self) -> bool {
        self.mode == Mode::Dev
    }
}

fn string(source: &dyn ConfigSource, key: &str, default: &str) -> String {
    non_blank(source, key).unwrap_or_else(|| default.to_owned())
}

fn non_blank(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source.get(key).filter(|value| !value.trim().is_empty())
}

fn parse<T>(source: &dyn ConfigSource, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_blank(source, key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|error| Error::config(key, format!("`{value}`: {error}"))),
        None => Ok(default),
    }
}
