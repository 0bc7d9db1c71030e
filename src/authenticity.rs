use crate::{Filter, RequestContext, Response};

/// The request header carrying the authenticity token.
pub const AUTHENTICITY_HEADER: &str = "X-CSRF-Token";
/// The form field carrying the authenticity token.
pub const AUTHENTICITY_FIELD: &str = "authenticityToken";

/// Rejects state-changing requests whose authenticity token does not match the session.
///
/// POST, PUT, PATCH and DELETE requests must carry the session's authenticity token in the
/// `X-CSRF-Token` header, or in a form field named `authenticityToken` or `X-CSRF-Token`.
/// Otherwise the request is answered with 403 and the filter chain ends.
/// Other methods are never checked.
///
/// The tokens are compared with plain string equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticityFilter;

impl AuthenticityFilter {
    fn supplied_token(context: &RequestContext) -> Option<&str> {
        context
            .request()
            .header(AUTHENTICITY_HEADER)
            .or_else(|| context.form().get(AUTHENTICITY_FIELD))
            .or_else(|| context.form().get(AUTHENTICITY_HEADER))
    }
}

impl Filter for AuthenticityFilter {
    fn execute(
        &self,
        context: &mut RequestContext,
        response: Response,
    ) -> anyhow::Result<Response> {
        if !context.request().is_state_changing() {
            return Ok(response);
        }

        let expected = context.session().authenticity_token();
        if expected.is_empty() {
            return Ok(response);
        }

        match Self::supplied_token(context) {
            Some(supplied) if supplied == expected => Ok(response),
            supplied => {
                log::warn!(
                    "Rejecting {} {}: authenticity token {}",
                    context.request().method(),
                    context.request().path(),
                    if supplied.is_some() { "mismatch" } else { "missing" },
                );
                Ok(Response::forbidden().body_text("Forbidden").end())
            }
        }
    }

    fn name(&self) -> &str {
        "AuthenticityFilter"
    }
}
