use crate::binder::ParamKind;
use http::StatusCode;

/// All errors that can abort a request.
///
/// Cookies that fail to decode are not errors, see [`Absent`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No registered route matches the request method and path.
    #[error("no route matches {method} {path}")]
    RouteNotFound {
        /// The request method.
        method: String,
        /// The request path.
        path: String,
    },

    /// A declared handler parameter could not be coerced from the request parameters.
    #[error("parameter `{name}` is declared as {kind:?}, but the request supplied `{value}`")]
    Binding {
        /// The declared parameter name.
        name: String,
        /// The declared semantic type.
        kind: ParamKind,
        /// The raw value that failed to coerce.
        value: String,
    },

    /// The request declared a JSON body, but the body does not parse.
    #[error("the request body for parameter `{name}` is not valid JSON")]
    MalformedBody {
        /// The declared parameter name.
        name: String,
        /// The JSON parser error.
        #[source]
        source: serde_json::Error,
    },

    /// A form body (url-encoded or multipart) could not be parsed.
    #[error("the form body could not be parsed")]
    Form(#[source] anyhow::Error),

    /// A filter raised a failure instead of returning a response.
    #[error("filter `{filter}` failed")]
    Filter {
        /// The name of the failing filter.
        filter: String,
        /// The failure raised by the filter.
        #[source]
        source: anyhow::Error,
    },

    /// The handler raised a failure instead of returning a response.
    #[error("handler `{handler}` failed")]
    Handler {
        /// `Controller.method` of the failing handler.
        handler: String,
        /// The failure raised by the handler.
        #[source]
        source: anyhow::Error,
    },

    /// The template engine failed to render.
    #[error("template `{template}` failed to render")]
    Render {
        /// The template path that was rendered.
        template: String,
        /// The failure raised by the template engine.
        #[source]
        source: anyhow::Error,
    },

    /// A signing or encryption primitive failed.
    /// This indicates a configuration or environment problem, not a tampered cookie.
    #[error("cryptographic primitive failed: {0}")]
    Crypto(String),

    /// A configuration value is missing or malformed.
    #[error("invalid configuration value for `{key}`: {reason}")]
    Config {
        /// The configuration key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A route was registered with an inconsistent descriptor.
    #[error("route `{route}` is invalid: {reason}")]
    Route {
        /// The route pattern.
        route: String,
        /// Why the route was rejected.
        reason: String,
    },

    /// The worker running the request was lost, e.g. because it panicked.
    #[error("the request worker failed: {0}")]
    Worker(String),
}

impl Error {
    /// The HTTP status code the client sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Error::MalformedBody { .. } | Error::Form(_) => StatusCode::BAD_REQUEST,
            Error::Binding { .. }
            | Error::Filter { .. }
            | Error::Handler { .. }
            | Error::Render { .. }
            | Error::Crypto(_)
            | Error::Config { .. }
            | Error::Route { .. }
            | Error::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn config(key: &str, reason: impl Into<String>) -> Self {
        Error::Config {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Marker for a cookie envelope that is missing, malformed, expired or tampered with.
///
/// It intentionally carries no reason, so callers cannot tell the cases apart.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Absent;

impl std::fmt::Display for Absent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "absent")
    }
}

#[allow(dead_code)]
mod expect_impl_error {
    trait ExpectImplError: std::error::Error {}

    impl ExpectImplError for super::Error {}
}
