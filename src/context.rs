use crate::{Authentication, Flash, Form, LoginLock, Request, Session};
use std::sync::Arc;

/// All state of one request, owned by the lifecycle and handed to filters and handlers.
///
/// Nothing in here is shared with other requests, except for the login lockout counters.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    session: Session,
    authentication: Authentication,
    flash: Flash,
    form: Form,
    locale: String,
    controller: String,
    action: String,
    login_lock: Arc<LoginLock>,
}

impl RequestContext {
    /// Assemble a context from the decoded request state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request: Request,
        session: Session,
        authentication: Authentication,
        flash: Flash,
        form: Form,
        locale: impl Into<String>,
        route: (&str, &str),
        login_lock: Arc<LoginLock>,
    ) -> Self {
        Self {
            request,
            session,
            authentication,
            flash,
            form,
            locale: locale.into(),
            controller: route.0.to_owned(),
            action: route.1.to_owned(),
            login_lock,
        }
    }

    /// The request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The session, mutably. Writes mark it as changed.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The authentication.
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// The authentication, mutably.
    pub fn authentication_mut(&mut self) -> &mut Authentication {
        &mut self.authentication
    }

    /// The flash.
    pub fn flash(&self) -> &Flash {
        &self.flash
    }

    /// The flash, mutably.
    pub fn flash_mut(&mut self) -> &mut Flash {
        &mut self.flash
    }

    /// The form parsed from the request body.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// The form, mutably, e.g. to run validations.
    pub fn form_mut(&mut self) -> &mut Form {
        &mut self.form
    }

    /// The language of this request.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// The controller name of the matched route.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// The method name of the matched route.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The failed login counters shared by all requests.
    pub fn login_lock(&self) -> &LoginLock {
        &self.login_lock
    }

    /// Checks the credentials of `subject` against the login lockout, see [`Authentication::valid_login`].
    pub fn valid_login(
        &self,
        subject: &str,
        verify: impl FnOnce() -> anyhow::Result<bool>,
    ) -> anyhow::Result<bool> {
        self.authentication
            .valid_login(&self.login_lock, subject, verify)
    }

    pub(crate) fn into_state(self) -> (Session, Authentication, Flash) {
        (self.session, self.authentication, self.flash)
    }
}
