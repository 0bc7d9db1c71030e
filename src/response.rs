use cookie::time::Duration;
use cookie::Cookie;
use http::header::{HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

/// The raw outbound response handed back to the transport.
pub type HttpResponse = http::Response<Vec<u8>>;

const TEXT_HTML: &str = "text/html; charset=UTF-8";
const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";
const APPLICATION_JSON: &str = "application/json; charset=UTF-8";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub(crate) enum Body {
    /// The body is produced by the template engine from the content map.
    Render,
    Text(String),
    Binary(Vec<u8>),
}

/// The response accumulated by filters and the handler.
///
/// A response starts out to be rendered by the template engine; setting a body replaces that.
/// Filters stop the chain by calling [`Response::end`].
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::Response;
/// # use http::StatusCode;
/// let response = Response::forbidden().body_text("nope").end();
/// assert_eq!(response.status(), StatusCode::FORBIDDEN);
/// assert!(response.is_ended());
/// assert!(!response.is_rendered());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    content_type: String,
    body: Body,
    headers: HeaderMap,
    content: Map<String, Value>,
    template: Option<String>,
    cookies: Vec<Cookie<'static>>,
    end: bool,
}

impl Response {
    /// The status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// A response with the given status code.
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            content_type: TEXT_HTML.to_owned(),
            body: Body::Render,
            headers: HeaderMap::new(),
            content: Map::new(),
            template: None,
            cookies: Vec::new(),
            end: false,
        }
    }

    /// 200 OK.
    pub fn ok() -> Self {
        Self::with_status(StatusCode::OK)
    }

    /// 201 Created.
    pub fn created() -> Self {
        Self::with_status(StatusCode::CREATED)
    }

    /// 400 Bad Request.
    pub fn bad_request() -> Self {
        Self::with_status(StatusCode::BAD_REQUEST)
    }

    /// 401 Unauthorized.
    pub fn unauthorized() -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED)
    }

    /// 403 Forbidden.
    pub fn forbidden() -> Self {
        Self::with_status(StatusCode::FORBIDDEN)
    }

    /// 404 Not Found.
    pub fn not_found() -> Self {
        Self::with_status(StatusCode::NOT_FOUND)
    }

    /// 500 Internal Server Error.
    pub fn internal_server_error() -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 302 Found, redirecting to `location`.
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::with_status(StatusCode::FOUND).body_text("");
        match HeaderValue::from_str(location) {
            Ok(location) => {
                response.headers.insert(LOCATION, location);
            }
            Err(_) => log::error!("Invalid redirect location {location:?}"),
        }
        response
    }

    /// Adds a value to the content map passed to the template engine.
    pub fn render(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(name.into(), value.into());
        self
    }

    /// Adds a serializable value to the content map passed to the template engine.
    pub fn render_serialized(
        self,
        name: impl Into<String>,
        value: &impl Serialize,
    ) -> anyhow::Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.render(name, value))
    }

    /// Renders the given template instead of the one derived from the handler name.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Overrides the content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sends `text` as plain text.
    pub fn body_text(mut self, text: impl Into<String>) -> Self {
        self.content_type = TEXT_PLAIN.to_owned();
        self.body = Body::Text(text.into());
        self
    }

    /// Sends `html` without rendering a template.
    pub fn body_html(mut self, html: impl Into<String>) -> Self {
        self.content_type = TEXT_HTML.to_owned();
        self.body = Body::Text(html.into());
        self
    }

    /// Sends `value` serialized as JSON.
    pub fn body_json(mut self, value: &impl Serialize) -> anyhow::Result<Self> {
        self.content_type = APPLICATION_JSON.to_owned();
        self.body = Body::Text(serde_json::to_string(value)?);
        Ok(self)
    }

    /// Sends raw bytes.
    pub fn body_binary(mut self, data: Vec<u8>) -> Self {
        self.content_type = OCTET_STREAM.to_owned();
        self.body = Body::Binary(data);
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Adds a cookie.
    pub fn cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Removes the cookie `name` from the client.
    pub fn dispose_cookie(self, name: impl Into<String>) -> Self {
        let cookie = Cookie::build((name.into(), ""))
            .path("/")
            .max_age(Duration::ZERO)
            .build();
        self.cookie(cookie)
    }

    /// Stops the filter chain; no further filter and no handler runs.
    pub fn end(mut self) -> Self {
        self.end = true;
        self
    }

    /// Returns true if a filter stopped the chain.
    pub fn is_ended(&self) -> bool {
        self.end
    }

    /// Returns true if the body still has to be rendered by the template engine.
    pub fn is_rendered(&self) -> bool {
        matches!(self.body, Body::Render)
    }

    /// Returns true for 3xx responses.
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    /// The content map passed to the template engine.
    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    /// The explicitly chosen template, if any.
    pub fn template_name(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The cookies added by filters and the handler.
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    /// Carries content, headers and cookies accumulated by the filter chain over to this response.
    /// Values set by this response win.
    pub(crate) fn merge_from(&mut self, filtered: Response) {
        for (name, value) in filtered.content {
            self.content.entry(name).or_insert(value);
        }
        for (name, value) in filtered.headers.iter() {
            if !self.headers.contains_key(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        let mut cookies = filtered.cookies;
        cookies.append(&mut self.cookies);
        self.cookies = cookies;
    }

    pub(crate) fn set_rendered_body(&mut self, html: String) {
        self.body = Body::Text(html);
    }

    pub(crate) fn into_parts(self) -> ResponseParts {
        let body = match self.body {
            Body::Render => Vec::new(),
            Body::Text(text) => text.into_bytes(),
            Body::Binary(data) => data,
        };
        ResponseParts {
            status: self.status,
            content_type: self.content_type,
            headers: self.headers,
            cookies: self.cookies,
            body,
        }
    }
}

pub(crate) struct ResponseParts {
    pub(crate) status: StatusCode,
    pub(crate) content_type: String,
    pub(crate) headers: HeaderMap,
    pub(crate) cookies: Vec<Cookie<'static>>,
    pub(crate) body: Vec<u8>,
}
