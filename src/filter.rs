use crate::{Config, Error, RequestContext, Response, Result};
use std::fmt::Debug;
use std::sync::Arc;

/// A hook running before the handler.
///
/// A filter receives the response accumulated so far and returns it, possibly modified.
/// Calling [`Response::end`] on the returned response stops the chain: no later filter and no handler runs.
/// Returning an error aborts the request with a 500.
///
/// Closures of the form `Fn(&mut RequestContext, Response) -> anyhow::Result<Response>` are filters.
pub trait Filter: Send + Sync {
    /// Run the filter.
    fn execute(&self, context: &mut RequestContext, response: Response)
        -> anyhow::Result<Response>;

    /// The name of the filter used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Filter for F
where
    F: Fn(&mut RequestContext, Response) -> anyhow::Result<Response> + Send + Sync,
{
    fn execute(
        &self,
        context: &mut RequestContext,
        response: Response,
    ) -> anyhow::Result<Response> {
        self(context, response)
    }
}

/// Wraps a closure as a [`Filter`], fixing its signature.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::{filter_fn, Response, Router};
/// let mut router = Router::new();
/// router.controller_filter(
///     "Admin",
///     filter_fn(|context, response| {
///         if context.authentication().is_valid() {
///             Ok(response)
///         } else {
///             Ok(Response::forbidden().end())
///         }
///     }),
/// );
/// ```
pub fn filter_fn<F>(filter: F) -> F
where
    F: Fn(&mut RequestContext, Response) -> anyhow::Result<Response> + Send + Sync,
{
    filter
}

/// The result of running a filter chain.
#[derive(Debug)]
pub(crate) enum ChainOutcome {
    /// All filters passed; the handler runs.
    Continue(Response),
    /// A filter ended the response.
    Ended(Response),
}

/// The global, controller and method filters of one route, in execution order.
///
/// Chains are resolved once when the router is frozen.
#[derive(Clone, Default)]
pub(crate) struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

impl FilterChain {
    pub(crate) fn new(
        global: Option<&Arc<dyn Filter>>,
        controller: &[Arc<dyn Filter>],
        method: &[Arc<dyn Filter>],
    ) -> Self {
        let filters = global
            .into_iter()
            .chain(controller)
            .chain(method)
            .cloned()
            .collect();
        Self { filters }
    }

    pub(crate) fn len(&self) -> usize {
        self.filters.len()
    }

    pub(crate) fn run(
        &self,
        context: &mut RequestContext,
        mut response: Response,
    ) -> Result<ChainOutcome> {
        for filter in &self.filters {
            response = filter
                .execute(context, response)
                .map_err(|source| Error::Filter {
                    filter: filter.name().to_owned(),
                    source,
                })?;
            if response.is_ended() {
                log::debug!("Filter {} ended the request", filter.name());
                return Ok(ChainOutcome::Ended(response));
            }
        }
        Ok(ChainOutcome::Continue(response))
    }
}

/// Requires a logged-in subject that has passed the second factor.
///
/// Unauthenticated requests are redirected to the login page, requests pending a second factor
/// to the second factor page. Without a configured page, the request is answered with 401.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationFilter {
    login_redirect: Option<String>,
    mfa_redirect: Option<String>,
}

impl AuthenticationFilter {
    /// Create a filter redirecting to the given pages.
    pub fn new(login_redirect: Option<String>, mfa_redirect: Option<String>) -> Self {
        Self {
            login_redirect,
            mfa_redirect,
        }
    }

    /// Create a filter redirecting to the pages named in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.login_redirect.clone(), config.mfa_redirect.clone())
    }

    fn deny(redirect: Option<&str>) -> Response {
        match redirect {
            Some(location) => Response::redirect(location).end(),
            None => Response::unauthorized().body_text("Unauthorized").end(),
        }
    }
}

impl Filter for AuthenticationFilter {
    fn execute(
        &self,
        context: &mut RequestContext,
        response: Response,
    ) -> anyhow::Result<Response> {
        let authentication = context.authentication();
        if !authentication.is_valid() {
            log::debug!("Denying unauthenticated request to {}", context.request().path());
            return Ok(Self::deny(self.login_redirect.as_deref()));
        }
        if authentication.is_two_factor() {
            log::debug!("Denying request pending a second factor to {}", context.request().path());
            return Ok(Self::deny(self.mfa_redirect.as_deref()));
        }
        Ok(response)
    }

    fn name(&self) -> &str {
        "AuthenticationFilter"
    }
}
