use crate::{Authentication, Error, Flash, Form, Response, Session};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// The suffix of template files.
pub const TEMPLATE_SUFFIX: &str = ".html";

/// Translates message keys for a locale.
pub trait MessageSource: Send + Sync {
    /// The message for `key` in `locale`, if any.
    fn message(&self, locale: &str, key: &str) -> Option<String>;
}

/// A message source without any messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMessages;

impl MessageSource for NoMessages {
    fn message(&self, _locale: &str, _key: &str) -> Option<String> {
        None
    }
}

/// Everything a template can refer to.
pub struct TemplateContext<'a> {
    /// The template path, `Controller/method.html` unless the handler chose one.
    pub template: &'a str,
    /// The values rendered by filters and the handler.
    pub content: &'a Map<String, Value>,
    /// The controller of the matched route.
    pub controller: &'a str,
    /// The language of the request.
    pub locale: &'a str,
    /// The session.
    pub session: &'a Session,
    /// The flash.
    pub flash: &'a Flash,
    /// The form.
    pub form: &'a Form,
    /// The authentication.
    pub authentication: &'a Authentication,
    /// Translations, to be looked up with [`TemplateContext::locale`].
    pub messages: &'a dyn MessageSource,
}

impl Debug for TemplateContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateContext")
            .field("template", &self.template)
            .field("content", &self.content)
            .field("controller", &self.controller)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

impl TemplateContext<'_> {
    /// The translated message for `key`, or `key` itself if there is none.
    pub fn message(&self, key: &str) -> String {
        self.messages
            .message(self.locale, key)
            .unwrap_or_else(|| key.to_owned())
    }
}

/// Renders responses that do not carry a body of their own.
pub trait TemplateEngine: Send + Sync {
    /// Render the template named in `context`.
    fn render(&self, context: &TemplateContext<'_>) -> anyhow::Result<String>;

    /// The template path for a handler, `Controller/method.html` by default.
    fn template_path(&self, controller: &str, action: &str) -> String {
        format!("{controller}/{action}{TEMPLATE_SUFFIX}")
    }
}

/// Turns a failed request into a response.
pub trait ExceptionHandler: Send + Sync {
    /// Build the response for `error`. `dev` is true in development mode.
    fn handle(&self, error: &Error, dev: bool) -> Response;
}

/// Renders a minimal error page with the status of the error.
///
/// The error chain is shown in development mode only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle(&self, error: &Error, dev: bool) -> Response {
        let status = error.status();
        let title = status.canonical_reason().unwrap_or("Error");

        let mut page = format!("<!DOCTYPE html><html><head><title>{title}</title></head><body><h1>{title}</h1>");
        if dev {
            page.push_str("<pre>");
            let mut source: Option<&dyn std::error::Error> = Some(error);
            while let Some(current) = source {
                page.push_str(&escape_html(&current.to_string()));
                page.push('\n');
                source = current.source();
            }
            page.push_str("</pre>");
        }
        page.push_str("</body></html>");

        Response::with_status(status).body_html(page)
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
