use cookie::Cookie;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, Method};
use std::collections::BTreeMap;

/// The raw inbound request as handed over by the transport.
pub type HttpRequest = http::Request<Vec<u8>>;

/// A read-only view of the current request.
///
/// Parameters are the query parameters merged with the path parameters of the matched route;
/// path parameters win on conflicts.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    headers: HeaderMap,
    parameters: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Request {
    /// Split a transport request into its parts, parsing query parameters and cookies.
    pub fn from_http(request: HttpRequest) -> Self {
        let (parts, body) = request.into_parts();

        let parameters = parts
            .uri
            .query()
            .map(|query| {
                serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_else(|error| {
                    log::debug!("Ignoring malformed query string: {error}");
                    Vec::new()
                })
            })
            .unwrap_or_default()
            .into_iter()
            .collect();

        let mut cookies = BTreeMap::new();
        for header in parts.headers.get_all(COOKIE) {
            let Ok(header) = header.to_str() else {
                continue;
            };
            for cookie in Cookie::split_parse(header).flatten() {
                cookies.insert(cookie.name().to_owned(), cookie.value().to_owned());
            }
        }

        Self {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            headers: parts.headers,
            parameters,
            cookies,
            body,
        }
    }

    pub(crate) fn merge_path_parameters(&mut self, path_parameters: BTreeMap<String, String>) {
        self.parameters.extend(path_parameters);
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of the header `name`, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// A query or path parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// All query and path parameters.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// The value of the request cookie `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The raw request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The request body, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// The `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Returns true if the request declares a JSON body.
    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|content_type| {
                let essence = content_type.split(';').next().unwrap_or_default().trim();
                essence.eq_ignore_ascii_case("application/json")
                    || essence.to_ascii_lowercase().ends_with("+json")
            })
            .unwrap_or(false)
    }

    /// Returns true for methods that may change server state: POST, PUT, PATCH and DELETE.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Returns true for methods that carry a form body: POST, PUT and PATCH.
    pub fn has_form_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}
