use crate::binder;
use crate::crypto::Cipher;
use crate::filter::ChainOutcome;
use crate::response::ResponseParts;
use crate::router::Route;
use crate::template::{NoMessages, TemplateContext};
use crate::{
    Authentication, Config, CookieCommand, CookieSettings, DefaultExceptionHandler,
    DefaultTokenGenerator, EnvelopeCodec, Error, ExceptionHandler, Flash, Form, HttpRequest,
    HttpResponse, Invocation, LoginLock, MessageSource, Request, RequestContext, Response,
    Result, Routes, Session, TemplateEngine, TokenGenerator,
};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use http::header::{
    HeaderName, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, SET_COOKIE, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

const SECURITY_HEADERS: [(HeaderName, &str); 3] = [
    (X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (X_FRAME_OPTIONS, "SAMEORIGIN"),
    (X_XSS_PROTECTION, "1"),
];

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runs requests through all stages, from decoding the cookies to writing them back.
///
/// ```text
/// LOCALE → SESSION_DECODE → AUTH_DECODE → FLASH_DECODE → FORM_PARSE → FILTER_CHAIN
///     → [SHORT_CIRCUIT] | [INVOKE → RENDER] → FINALIZE
/// ```
///
/// A lifecycle is shared by all requests. Every request owns its own [`RequestContext`].
/// Any failure is turned into a response by the [`ExceptionHandler`].
pub struct Lifecycle {
    config: Config,
    routes: Routes,
    session_codec: EnvelopeCodec,
    authentication_codec: EnvelopeCodec,
    template_engine: Option<Box<dyn TemplateEngine>>,
    exception_handler: Box<dyn ExceptionHandler>,
    messages: Box<dyn MessageSource>,
    token_generator: Box<dyn TokenGenerator>,
    login_lock: Arc<LoginLock>,
    clock: Clock,
}

impl Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("template_engine", &self.template_engine.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Lifecycle`] from its collaborators.
pub struct LifecycleBuilder {
    config: Config,
    routes: Routes,
    template_engine: Option<Box<dyn TemplateEngine>>,
    exception_handler: Box<dyn ExceptionHandler>,
    messages: Box<dyn MessageSource>,
    token_generator: Box<dyn TokenGenerator>,
    clock: Clock,
}

impl Debug for LifecycleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBuilder")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl LifecycleBuilder {
    /// Sets the engine rendering responses without a body.
    pub fn template_engine(mut self, engine: impl TemplateEngine + 'static) -> Self {
        self.template_engine = Some(Box::new(engine));
        self
    }

    /// Replaces the [`DefaultExceptionHandler`].
    pub fn exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.exception_handler = Box::new(handler);
        self
    }

    /// Sets the translations passed to the template engine.
    pub fn message_source(mut self, messages: impl MessageSource + 'static) -> Self {
        self.messages = Box::new(messages);
        self
    }

    /// Replaces the [`DefaultTokenGenerator`] issuing authenticity tokens.
    pub fn token_generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.token_generator = Box::new(generator);
        self
    }

    /// Replaces the system clock.
    pub fn clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Builds the lifecycle, setting up the cookie ciphers if encryption is enabled.
    pub fn build(self) -> Result<Lifecycle> {
        let codec = |settings: &CookieSettings| -> Result<EnvelopeCodec> {
            let cipher = if settings.encrypt {
                Some(Cipher::new(&self.config.encryption_key)?)
            } else {
                None
            };
            Ok(EnvelopeCodec::new(settings.secret.clone(), cipher)
                .purpose(settings.name.clone()))
        };
        let session_codec = codec(&self.config.session)?;
        let authentication_codec = codec(&self.config.authentication)?;

        Ok(Lifecycle {
            login_lock: Arc::new(LoginLock::new(self.config.authentication_lock)),
            config: self.config,
            routes: self.routes,
            session_codec,
            authentication_codec,
            template_engine: self.template_engine,
            exception_handler: self.exception_handler,
            messages: self.messages,
            token_generator: self.token_generator,
            clock: self.clock,
        })
    }
}

impl Lifecycle {
    /// Start assembling a lifecycle serving `routes`.
    pub fn builder(config: Config, routes: Routes) -> LifecycleBuilder {
        LifecycleBuilder {
            config,
            routes,
            template_engine: None,
            exception_handler: Box::new(DefaultExceptionHandler),
            messages: Box::new(NoMessages),
            token_generator: Box::new(DefaultTokenGenerator::<{ crate::TOKEN_LENGTH }>),
            clock: Box::new(Utc::now),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The failed login counters shared by all requests.
    pub fn login_lock(&self) -> &LoginLock {
        &self.login_lock
    }

    /// The codec of the session cookie.
    pub fn session_codec(&self) -> &EnvelopeCodec {
        &self.session_codec
    }

    /// The codec of the authentication cookie.
    pub fn authentication_codec(&self) -> &EnvelopeCodec {
        &self.authentication_codec
    }

    /// Process one request. Never fails: errors are rendered by the exception handler.
    ///
    /// This blocks for the whole request and must run on a worker, see [`crate::Dispatcher`].
    pub fn handle(&self, request: HttpRequest) -> HttpResponse {
        let now = (self.clock)();
        let request = Request::from_http(request);
        let method = request.method().clone();
        let path = request.path().to_owned();
        log::trace!("START {method} {path}");

        match self.process(request, now) {
            Ok(response) => response,
            Err(error) => {
                if matches!(error, Error::RouteNotFound { .. }) {
                    log::debug!("{error}");
                } else {
                    log::error!("{method} {path} failed: {}", error_chain(&error));
                }
                self.error_response(&error)
            }
        }
    }

    /// The response for a request that failed with `error`.
    pub(crate) fn error_response(&self, error: &Error) -> HttpResponse {
        let response = self.exception_handler.handle(error, self.config.is_dev());
        self.assemble(response.into_parts(), Vec::new())
    }

    fn process(&self, mut request: Request, now: DateTime<Utc>) -> Result<HttpResponse> {
        let (route, path_parameters) = self.routes.find(request.method(), request.path())?;
        request.merge_path_parameters(path_parameters);

        log::trace!("LOCALE");
        let locale = self.resolve_locale(&request);
        log::trace!("SESSION_DECODE");
        let session = self.decode_session(&request, now);
        log::trace!("AUTH_DECODE");
        let authentication = self.decode_authentication(&request, now);
        log::trace!("FLASH_DECODE");
        let flash = self.decode_flash(&request);
        log::trace!("FORM_PARSE");
        let form = if request.has_form_body() {
            Form::parse(request.content_type(), request.body())?
        } else {
            Form::new()
        };

        let mut context = RequestContext::new(
            request,
            session,
            authentication,
            flash,
            form,
            locale,
            (route.controller(), route.action()),
            Arc::clone(&self.login_lock),
        );

        log::trace!("FILTER_CHAIN");
        let response = match route.chain().run(&mut context, Response::ok())? {
            ChainOutcome::Ended(response) => {
                log::trace!("SHORT_CIRCUIT");
                response
            }
            ChainOutcome::Continue(filtered) => {
                log::trace!("INVOKE {}.{}", route.controller(), route.action());
                let mut response = self.invoke(route, &mut context)?;
                response.merge_from(filtered);
                if response.is_rendered() {
                    log::trace!("RENDER");
                    self.render(route, &context, &mut response)?;
                }
                response
            }
        };

        log::trace!("FINALIZE");
        self.finalize(context, response, now)
    }

    fn invoke(&self, route: &Route, context: &mut RequestContext) -> Result<Response> {
        let arguments = binder::bind(route.params(), context)?;
        let mut invocation = Invocation::new(context, route.params(), arguments);
        route
            .handler()
            .call(&mut invocation)
            .map_err(|source| Error::Handler {
                handler: format!("{}.{}", route.controller(), route.action()),
                source,
            })
    }

    fn render(
        &self,
        route: &Route,
        context: &RequestContext,
        response: &mut Response,
    ) -> Result<()> {
        let template = match (response.template_name(), &self.template_engine) {
            (Some(template), _) => template.to_owned(),
            (None, Some(engine)) => engine.template_path(route.controller(), route.action()),
            (None, None) => format!(
                "{}/{}{}",
                route.controller(),
                route.action(),
                crate::TEMPLATE_SUFFIX
            ),
        };

        let Some(engine) = &self.template_engine else {
            return Err(Error::Render {
                template,
                source: anyhow::anyhow!("no template engine is configured"),
            });
        };

        let body = engine
            .render(&TemplateContext {
                template: &template,
                content: response.content(),
                controller: route.controller(),
                locale: context.locale(),
                session: context.session(),
                flash: context.flash(),
                form: context.form(),
                authentication: context.authentication(),
                messages: self.messages.as_ref(),
            })
            .map_err(|source| Error::Render {
                template: template.clone(),
                source,
            })?;
        response.set_rendered_body(body);
        Ok(())
    }

    fn resolve_locale(&self, request: &Request) -> String {
        request
            .cookie(&self.config.language_cookie_name)
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .map(str::to_owned)
            .or_else(|| {
                request
                    .header(ACCEPT_LANGUAGE.as_str())
                    .and_then(first_language)
            })
            .unwrap_or_else(|| self.config.language.clone())
    }

    fn decode_session(&self, request: &Request, now: DateTime<Utc>) -> Session {
        request
            .cookie(&self.config.session.name)
            .and_then(|raw| match self.session_codec.decode(raw, now) {
                Ok(envelope) => Session::from_envelope(envelope),
                Err(absent) => {
                    log::debug!("Session cookie is {absent}, creating a new session");
                    None
                }
            })
            .unwrap_or_else(|| {
                Session::new(
                    self.token_generator.generate_token(),
                    expires_at(now, self.config.session.expires),
                )
            })
    }

    fn decode_authentication(&self, request: &Request, now: DateTime<Utc>) -> Authentication {
        request
            .cookie(&self.config.authentication.name)
            .and_then(|raw| match self.authentication_codec.decode(raw, now) {
                Ok(envelope) => {
                    let authentication = Authentication::from_envelope(envelope);
                    if authentication.is_none() {
                        log::warn!("Rejecting authentication cookie carrying a session token");
                    }
                    authentication
                }
                Err(absent) => {
                    log::debug!("Authentication cookie is {absent}");
                    None
                }
            })
            .unwrap_or_else(|| {
                Authentication::new(expires_at(now, self.config.authentication.expires))
            })
    }

    fn decode_flash(&self, request: &Request) -> Flash {
        request
            .cookie(&self.config.flash_cookie_name)
            .and_then(|raw| {
                let flash = Flash::from_cookie(raw);
                if flash.is_none() {
                    log::debug!("Ignoring malformed flash cookie");
                }
                flash
            })
            .unwrap_or_default()
    }

    fn finalize(
        &self,
        context: RequestContext,
        response: Response,
        now: DateTime<Utc>,
    ) -> Result<HttpResponse> {
        let (session, mut authentication, flash) = context.into_state();
        let mut cookies = Vec::new();

        match session.cookie_command() {
            CookieCommand::Set(session) => {
                let value = self.session_codec.encode(
                    session.values(),
                    Some(session.authenticity_token()),
                    session.expiry(),
                )?;
                cookies.push(self.cookie(
                    &self.config.session.name,
                    value,
                    Some((session.expiry(), now)),
                ));
            }
            CookieCommand::Clear => cookies.push(self.removal(&self.config.session.name)),
            CookieCommand::DoNothing => {}
        }

        if authentication.is_logout() {
            cookies.push(self.removal(&self.config.authentication.name));
        } else if authentication.is_valid() && authentication.is_changed() {
            let ttl = if authentication.is_remember_me() {
                self.config.remember_expires
            } else {
                self.config.authentication.expires
            };
            authentication.set_expiry(expires_at(now, ttl));
            let value = self.authentication_codec.encode(
                &authentication.to_values(),
                None,
                authentication.expiry(),
            )?;
            cookies.push(self.cookie(
                &self.config.authentication.name,
                value,
                Some((authentication.expiry(), now)),
            ));
        }

        if flash.is_discard() {
            cookies.push(self.removal(&self.config.flash_cookie_name));
        } else if flash.has_new_content() {
            cookies.push(self.cookie(&self.config.flash_cookie_name, flash.encode(), None));
        }

        Ok(self.assemble(response.into_parts(), cookies))
    }

    fn cookie(
        &self,
        name: &str,
        value: String,
        expiry: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Cookie<'static> {
        let mut cookie = Cookie::build((name.to_owned(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.config.cookie_secure);
        if let Some((expiry, now)) = expiry {
            let seconds = (expiry - now).num_seconds().max(0);
            cookie = cookie.max_age(cookie::time::Duration::seconds(seconds));
        }
        cookie.build()
    }

    fn removal(&self, name: &str) -> Cookie<'static> {
        Cookie::build((name.to_owned(), ""))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.config.cookie_secure)
            .max_age(cookie::time::Duration::ZERO)
            .build()
    }

    fn assemble(&self, parts: ResponseParts, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        let ResponseParts {
            status,
            content_type,
            mut headers,
            cookies: response_cookies,
            body,
        } = parts;

        if !headers.contains_key(CONTENT_TYPE) {
            match HeaderValue::from_str(&content_type) {
                Ok(value) => {
                    headers.insert(CONTENT_TYPE, value);
                }
                Err(_) => log::error!("Invalid content type {content_type:?}"),
            }
        }
        for (name, value) in SECURITY_HEADERS {
            headers
                .entry(name)
                .or_insert(HeaderValue::from_static(value));
        }
        for cookie in response_cookies.into_iter().chain(cookies) {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => log::error!("Dropping cookie {} with an invalid value", cookie.name()),
            }
        }

        let mut response = HttpResponse::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn first_language(header: &str) -> Option<String> {
    let first = header.split(',').next()?.split(';').next()?.trim();
    (!first.is_empty() && first != "*").then(|| first.to_owned())
}

fn expires_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(now)
}

pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(current) = source {
        chain.push_str(": ");
        chain.push_str(&current.to_string());
        source = current.source();
    }
    chain
}
