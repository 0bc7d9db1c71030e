//! The request-processing core of a server framework.
//!
//! This crate turns a raw inbound HTTP request into a fully resolved [`RequestContext`]
//! (session, authentication, flash messages, form, bound handler arguments),
//! runs the route's filter chain, invokes the handler and writes the resulting state
//! back into signed, optionally encrypted cookies.
//!
//! # Cookies
//!
//! The [`Session`] and the [`Authentication`] travel in cookies signed with HMAC-SHA512,
//! see [`EnvelopeCodec`]. A cookie that is missing, malformed, expired or tampered with
//! is treated as absent, and the request continues with a fresh session.
//! The [`Flash`] travels unsigned and survives exactly one redirect.
//!
//! # Change tracking
//!
//! Changes are tracked automatically.
//! A session that was loaded from its cookie and left unchanged is not written back.
//! A new session is always written back, as it carries the authenticity token
//! checked by the [`AuthenticityFilter`].
//!
//! # Example
//!
//! ```
//! use request_lifecycle::{
//!     AuthenticityFilter, Config, Invocation, Lifecycle, ParamKind, ParamSpec, Response,
//!     RouteDescriptor, Router,
//! };
//! use http::{Method, StatusCode};
//! use std::collections::HashMap;
//!
//! # fn main() -> request_lifecycle::Result {
//! let source = HashMap::from([(
//!     "application.secret".to_owned(),
//!     "a-secret-of-at-least-16-chars".to_owned(),
//! )]);
//! let config = Config::from_source(&source)?;
//!
//! let mut router = Router::new();
//! router.global_filter(AuthenticityFilter);
//! router.register(
//!     RouteDescriptor::new(Method::GET, "/hello/{name}", "Greeter", "hello")
//!         .param(ParamSpec::new("name", ParamKind::String))
//!         .handler(|invocation: &mut Invocation<'_>| {
//!             let name = invocation.string("name").unwrap_or_default().to_owned();
//!             invocation.session().put("greeted", name.as_str());
//!             Ok(Response::ok().body_text(format!("Hello, {name}!")))
//!         }),
//! )?;
//!
//! let lifecycle = Lifecycle::builder(config, router.freeze()).build()?;
//! let request = http::Request::get("/hello/alice").body(Vec::new()).unwrap();
//! let response = lifecycle.handle(request);
//!
//! assert_eq!(response.status(), StatusCode::OK);
//! assert_eq!(response.body().as_slice(), b"Hello, alice!");
//! assert!(response.headers().contains_key(http::header::SET_COOKIE));
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![deny(future_incompatible, nonstandard_style)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    unused_qualifications
)]

pub use error::{Absent, Error};
/// A result with the crate's [`Error`] and a default return type of ().
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

mod authentication;
mod authenticity;
mod binder;
mod config;
mod context;
pub mod crypto;
mod dispatcher;
mod envelope;
mod error;
mod filter;
mod flash;
mod form;
mod lifecycle;
mod login_lock;
mod request;
mod response;
mod router;
mod session;
mod template;

pub use authentication::{Authentication, ExternalIdentity};
pub use authenticity::{AuthenticityFilter, AUTHENTICITY_FIELD, AUTHENTICITY_HEADER};
pub use binder::{bind, Argument, Invocation, ParamKind, ParamSpec};
pub use config::{Config, ConfigSource, CookieSettings, Mode};
pub use context::RequestContext;
pub use crypto::token_generator::{
    DebugTokenGenerator, DefaultTokenGenerator, TokenGenerator, TOKEN_LENGTH,
};
pub use crypto::Cipher;
pub use dispatcher::Dispatcher;
pub use envelope::{
    Envelope, EnvelopeCodec, DATA_DELIMITER, FIELD_DELIMITER, KEY_VALUE_SEPARATOR,
    PAIR_SEPARATOR,
};
pub use filter::{filter_fn, AuthenticationFilter, Filter};
pub use flash::Flash;
pub use form::{Form, FormFile};
pub use lifecycle::{Lifecycle, LifecycleBuilder};
pub use login_lock::LoginLock;
pub use request::{HttpRequest, Request};
pub use response::{HttpResponse, Response};
pub use router::{Handler, Route, RouteDescriptor, Router, Routes};
pub use session::{CookieCommand, Session};
pub use template::{
    DefaultExceptionHandler, ExceptionHandler, MessageSource, NoMessages, TemplateContext,
    TemplateEngine, TEMPLATE_SUFFIX,
};
