use crate::{Authentication, Error, Flash, Form, Request, RequestContext, Result, Session};
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde_json::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The semantic type of a declared handler parameter.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParamKind {
    /// The [`Form`] of the request.
    Form,
    /// The [`Session`] of the request.
    Session,
    /// The [`Flash`] of the request.
    Flash,
    /// The [`Authentication`] of the request.
    Authentication,
    /// The [`Request`] itself.
    Request,
    /// A string parameter, empty if absent.
    String,
    /// A 32 bit integer parameter, zero if absent.
    Int,
    /// A 64 bit integer parameter, zero if absent.
    Long,
    /// A 32 bit float parameter, zero if absent.
    Float,
    /// A 64 bit float parameter, zero if absent.
    Double,
    /// A string parameter, `None` if absent.
    Optional,
    /// A `yyyy-mm-dd` date, `None` if absent.
    LocalDate,
    /// A `yyyy-mm-ddThh:mm:ss` date and time, `None` if absent.
    LocalDateTime,
    /// The JSON request body.
    Json,
}

/// A declared handler parameter.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParamSpec {
    /// The name the value is looked up with in the query and path parameters.
    pub name: String,
    /// The semantic type.
    pub kind: ParamKind,
}

impl ParamSpec {
    /// Declare a parameter.
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A bound handler argument.
///
/// Context arguments are markers; the objects themselves are reached through the [`Invocation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// See [`ParamKind::Form`].
    Form,
    /// See [`ParamKind::Session`].
    Session,
    /// See [`ParamKind::Flash`].
    Flash,
    /// See [`ParamKind::Authentication`].
    Authentication,
    /// See [`ParamKind::Request`].
    Request,
    /// See [`ParamKind::String`].
    String(String),
    /// See [`ParamKind::Int`].
    Int(i32),
    /// See [`ParamKind::Long`].
    Long(i64),
    /// See [`ParamKind::Float`].
    Float(f32),
    /// See [`ParamKind::Double`].
    Double(f64),
    /// See [`ParamKind::Optional`].
    Optional(Option<String>),
    /// See [`ParamKind::LocalDate`].
    LocalDate(Option<NaiveDate>),
    /// See [`ParamKind::LocalDateTime`].
    LocalDateTime(Option<NaiveDateTime>),
    /// See [`ParamKind::Json`]. `Null` if the request does not carry JSON.
    Json(Value),
}

/// Bind all declared parameters against the request, in declaration order.
///
/// Blank or absent values yield the defaults of their kind. Values that do not coerce to the
/// declared kind fail the request, as does a JSON body that does not parse.
pub fn bind(params: &[ParamSpec], context: &RequestContext) -> Result<Vec<Argument>> {
    params
        .iter()
        .map(|param| bind_one(param, context))
        .collect()
}

fn bind_one(param: &ParamSpec, context: &RequestContext) -> Result<Argument> {
    let request = context.request();
    let raw = request
        .parameter(&param.name)
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let argument = match param.kind {
        ParamKind::Form => Argument::Form,
        ParamKind::Session => Argument::Session,
        ParamKind::Flash => Argument::Flash,
        ParamKind::Authentication => Argument::Authentication,
        ParamKind::Request => Argument::Request,
        ParamKind::String => Argument::String(
            request
                .parameter(&param.name)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_default()
                .to_owned(),
        ),
        ParamKind::Optional => Argument::Optional(
            request
                .parameter(&param.name)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_owned),
        ),
        ParamKind::Int => Argument::Int(number(param, raw)?),
        ParamKind::Long => Argument::Long(number(param, raw)?),
        ParamKind::Float => Argument::Float(number(param, raw)?),
        ParamKind::Double => Argument::Double(number(param, raw)?),
        ParamKind::LocalDate => Argument::LocalDate(
            raw.map(|value| {
                NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| coercion(param, value))
            })
            .transpose()?,
        ),
        ParamKind::LocalDateTime => Argument::LocalDateTime(
            raw.map(|value| {
                NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
                    .map_err(|_| coercion(param, value))
            })
            .transpose()?,
        ),
        ParamKind::Json => Argument::Json(json_body(param, request)?),
    };
    Ok(argument)
}

fn number<T>(param: &ParamSpec, raw: Option<&str>) -> Result<T>
where
    T: std::str::FromStr + Default,
{
    match raw {
        Some(value) => value.parse().map_err(|_| coercion(param, value)),
        None => Ok(T::default()),
    }
}

fn coercion(param: &ParamSpec, value: &str) -> Error {
    Error::Binding {
        name: param.name.clone(),
        kind: param.kind,
        value: value.to_owned(),
    }
}

fn json_body(param: &ParamSpec, request: &Request) -> Result<Value> {
    if !request.is_json() || request.body().iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(request.body()).map_err(|source| Error::MalformedBody {
        name: param.name.clone(),
        source,
    })
}

/// The arguments of one handler call, together with the request state they were bound from.
///
/// Bound values are looked up by their declared name.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::{Invocation, ParamKind, ParamSpec, Response, Router, RouteDescriptor};
/// # use http::Method;
/// let route = RouteDescriptor::new(Method::GET, "/items/{id}", "Items", "show")
///     .param(ParamSpec::new("id", ParamKind::Long))
///     .param(ParamSpec::new("page", ParamKind::Int))
///     .handler(|invocation: &mut Invocation<'_>| {
///         let id = invocation.long("id").unwrap_or_default();
///         let page = invocation.int("page").unwrap_or_default();
///         Ok(Response::ok().body_text(format!("{id}/{page}")))
///     });
/// let mut router = Router::new();
/// router.register(route).unwrap();
/// ```
#[derive(Debug)]
pub struct Invocation<'a> {
    context: &'a mut RequestContext,
    params: &'a [ParamSpec],
    arguments: Vec<Argument>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        context: &'a mut RequestContext,
        params: &'a [ParamSpec],
        arguments: Vec<Argument>,
    ) -> Self {
        Self {
            context,
            params,
            arguments,
        }
    }

    /// The bound arguments in declaration order.
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// The argument bound for the parameter `name`.
    pub fn argument(&self, name: &str) -> Option<&Argument> {
        let index = self.params.iter().position(|param| param.name == name)?;
        self.arguments.get(index)
    }

    /// The value of a parameter declared as [`ParamKind::String`].
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.argument(name)? {
            Argument::String(value) => Some(value),
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::Optional`].
    pub fn optional(&self, name: &str) -> Option<&str> {
        match self.argument(name)? {
            Argument::Optional(value) => value.as_deref(),
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::Int`].
    pub fn int(&self, name: &str) -> Option<i32> {
        match self.argument(name)? {
            Argument::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::Long`].
    pub fn long(&self, name: &str) -> Option<i64> {
        match self.argument(name)? {
            Argument::Long(value) => Some(*value),
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::Float`].
    pub fn float(&self, name: &str) -> Option<f32> {
        match self.argument(name)? {
            Argument::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::Double`].
    pub fn double(&self, name: &str) -> Option<f64> {
        match self.argument(name)? {
            Argument::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::LocalDate`].
    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.argument(name)? {
            Argument::LocalDate(value) => *value,
            _ => None,
        }
    }

    /// The value of a parameter declared as [`ParamKind::LocalDateTime`].
    pub fn date_time(&self, name: &str) -> Option<NaiveDateTime> {
        match self.argument(name)? {
            Argument::LocalDateTime(value) => *value,
            _ => None,
        }
    }

    /// Deserializes the JSON body bound to the [`ParamKind::Json`] parameter.
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = self
            .arguments
            .iter()
            .find_map(|argument| match argument {
                Argument::Json(value) => Some(value.clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow::anyhow!("no JSON parameter declared"))?;
        Ok(serde_json::from_value(value)?)
    }

    /// The request context.
    pub fn context(&self) -> &RequestContext {
        &*self.context
    }

    /// The request context, mutably.
    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut *self.context
    }

    /// The request.
    pub fn request(&self) -> &Request {
        self.context.request()
    }

    /// The session.
    pub fn session(&mut self) -> &mut Session {
        self.context.session_mut()
    }

    /// The authentication.
    pub fn authentication(&mut self) -> &mut Authentication {
        self.context.authentication_mut()
    }

    /// The flash.
    pub fn flash(&mut self) -> &mut Flash {
        self.context.flash_mut()
    }

    /// The form.
    pub fn form(&mut self) -> &mut Form {
        self.context.form_mut()
    }
}
