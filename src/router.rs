use crate::filter::FilterChain;
use crate::{Error, Filter, Invocation, ParamKind, ParamSpec, Response, Result};
use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

/// The code invoked for a matched route.
///
/// Closures of the form `Fn(&mut Invocation<'_>) -> anyhow::Result<Response>` are handlers.
pub trait Handler: Send + Sync {
    /// Handle the request.
    fn call(&self, invocation: &mut Invocation<'_>) -> anyhow::Result<Response>;
}

impl<F> Handler for F
where
    F: Fn(&mut Invocation<'_>) -> anyhow::Result<Response> + Send + Sync,
{
    fn call(&self, invocation: &mut Invocation<'_>) -> anyhow::Result<Response> {
        self(invocation)
    }
}

/// Everything the router needs to know about one endpoint.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::{AuthenticityFilter, Invocation, ParamKind, ParamSpec, Response, RouteDescriptor};
/// # use http::Method;
/// let descriptor = RouteDescriptor::new(Method::POST, "/items/{id}", "Items", "update")
///     .filter(AuthenticityFilter)
///     .param(ParamSpec::new("id", ParamKind::Long))
///     .handler(|_: &mut Invocation<'_>| Ok(Response::redirect("/items")));
/// ```
pub struct RouteDescriptor {
    method: Method,
    pattern: String,
    controller: String,
    action: String,
    handler: Option<Arc<dyn Handler>>,
    filters: Vec<Arc<dyn Filter>>,
    params: Vec<ParamSpec>,
}

impl Debug for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("controller", &self.controller)
            .field("action", &self.action)
            .field("filters", &self.filters.len())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl RouteDescriptor {
    /// Describe the endpoint `method pattern`, served by `controller`'s `action`.
    ///
    /// Path segments of the form `{name}` match any single segment and are bound as parameter `name`.
    pub fn new(
        method: Method,
        pattern: impl Into<String>,
        controller: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            controller: controller.into(),
            action: action.into(),
            handler: None,
            filters: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Sets the handler closure.
    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        self.handler_object(handler)
    }

    /// Sets the handler.
    pub fn handler_object(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Appends a method-level filter.
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Appends a declared parameter.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Parameter(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    let invalid = |reason: &str| Error::Route {
        route: pattern.to_owned(),
        reason: reason.to_owned(),
    };
    let path = pattern
        .strip_prefix('/')
        .ok_or_else(|| invalid("the pattern must start with `/`"))?;

    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.strip_prefix('{') {
            Some(rest) => {
                let name = rest
                    .strip_suffix('}')
                    .filter(|name| !name.is_empty() && !name.contains(&['{', '}'][..]))
                    .ok_or_else(|| invalid("malformed path parameter"))?;
                Ok(Segment::Parameter(name.to_owned()))
            }
            None if segment.contains(&['{', '}'][..]) => Err(invalid("malformed path parameter")),
            None => Ok(Segment::Literal(segment.to_owned())),
        })
        .collect()
}

/// A frozen route: matched against requests, never modified.
pub struct Route {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    controller: String,
    action: String,
    handler: Arc<dyn Handler>,
    params: Vec<ParamSpec>,
    chain: FilterChain,
}

impl Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("controller", &self.controller)
            .field("action", &self.action)
            .field("params", &self.params)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// The controller name.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// The method name within the controller.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The path pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The declared parameters.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// The number of filters running before the handler.
    pub fn filter_count(&self) -> usize {
        self.chain.len()
    }

    pub(crate) fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    pub(crate) fn chain(&self) -> &FilterChain {
        &self.chain
    }

    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        for expected in &self.segments {
            let actual = segments.next()?;
            match expected {
                Segment::Literal(literal) if literal == actual => {}
                Segment::Literal(_) => return None,
                Segment::Parameter(name) => {
                    let value = urlencoding::decode(actual).ok()?.into_owned();
                    parameters.insert(name.clone(), value);
                }
            }
        }
        match segments.next() {
            Some(_) => None,
            None => Some(parameters),
        }
    }
}

/// Collects routes and filters during startup.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::{AuthenticityFilter, Invocation, Response, RouteDescriptor, Router};
/// # use http::Method;
/// let mut router = Router::new();
/// router.global_filter(AuthenticityFilter);
/// router
///     .register(
///         RouteDescriptor::new(Method::GET, "/", "Application", "index")
///             .handler(|_: &mut Invocation<'_>| Ok(Response::ok())),
///     )
///     .unwrap();
///
/// let routes = router.freeze();
/// let (route, _) = routes.find(&Method::GET, "/").unwrap();
/// assert_eq!(route.filter_count(), 1);
/// assert!(routes.find(&Method::POST, "/").is_err());
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<(RouteDescriptor, Vec<Segment>)>,
    controller_filters: HashMap<String, Vec<Arc<dyn Filter>>>,
    global_filter: Option<Arc<dyn Filter>>,
}

impl Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("global_filter", &self.global_filter.is_some())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the filter running first for every route.
    pub fn global_filter(&mut self, filter: impl Filter + 'static) -> &mut Self {
        self.global_filter = Some(Arc::new(filter));
        self
    }

    /// Appends a filter running for every route of `controller`, after the global filter
    /// and before the method filters.
    pub fn controller_filter(
        &mut self,
        controller: impl Into<String>,
        filter: impl Filter + 'static,
    ) -> &mut Self {
        self.controller_filters
            .entry(controller.into())
            .or_default()
            .push(Arc::new(filter));
        self
    }

    /// Adds a route.
    ///
    /// Fails if the pattern is malformed, the handler is missing,
    /// or more than one parameter is bound from the JSON body.
    pub fn register(&mut self, descriptor: RouteDescriptor) -> Result<&mut Self> {
        let segments = parse_pattern(&descriptor.pattern)?;
        let invalid = |reason: &str| Error::Route {
            route: descriptor.pattern.clone(),
            reason: reason.to_owned(),
        };

        if descriptor.handler.is_none() {
            return Err(invalid("no handler"));
        }
        let json_params = descriptor
            .params
            .iter()
            .filter(|param| param.kind == ParamKind::Json)
            .count();
        if json_params > 1 {
            return Err(invalid("at most one parameter can be bound from the JSON body"));
        }

        log::trace!(
            "Registering {} {} -> {}.{}",
            descriptor.method,
            descriptor.pattern,
            descriptor.controller,
            descriptor.action
        );
        self.routes.push((descriptor, segments));
        Ok(self)
    }

    /// Resolves the filter chain of every route and freezes the routes.
    pub fn freeze(self) -> Routes {
        let Router {
            routes,
            controller_filters,
            global_filter,
        } = self;

        let routes = routes
            .into_iter()
            .filter_map(|(descriptor, segments)| {
                let controller = controller_filters
                    .get(&descriptor.controller)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let chain = FilterChain::new(global_filter.as_ref(), controller, &descriptor.filters);
                Some(Route {
                    method: descriptor.method,
                    pattern: descriptor.pattern,
                    segments,
                    controller: descriptor.controller,
                    action: descriptor.action,
                    handler: descriptor.handler?,
                    params: descriptor.params,
                    chain,
                })
            })
            .collect();
        Routes { routes }
    }
}

/// The immutable route table, shared by all requests.
#[derive(Debug)]
pub struct Routes {
    routes: Vec<Route>,
}

impl Routes {
    /// Finds the first route matching `method` and `path`, along with its path parameters.
    pub fn find(&self, method: &Method, path: &str) -> Result<(&Route, BTreeMap<String, String>)> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| route.matches(path).map(|parameters| (route, parameters)))
            .ok_or_else(|| Error::RouteNotFound {
                method: method.to_string(),
                path: path.to_owned(),
            })
    }

    /// The number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
