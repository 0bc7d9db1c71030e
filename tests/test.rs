use chrono::{DateTime, Duration, Utc};
use cookie::Cookie;
use http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use http::{Method, StatusCode};
use request_lifecycle::{
    filter_fn, AuthenticationFilter, AuthenticityFilter, Config, DebugTokenGenerator, HttpResponse,
    Lifecycle, ParamKind, ParamSpec, Response, RouteDescriptor, Router, TemplateContext,
    TemplateEngine,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const SECRET: &str = "a-secret-of-at-least-16-chars";
const FIRST_TOKEN: &str = "00000000000000000000000000000000";

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn config(extra: &[(&str, &str)]) -> Config {
    let mut source = HashMap::from([("application.secret".to_owned(), SECRET.to_owned())]);
    for (key, value) in extra {
        source.insert((*key).to_owned(), (*value).to_owned());
    }
    Config::from_source(&source).unwrap()
}

fn lifecycle_with(router: Router, config: Config) -> Lifecycle {
    Lifecycle::builder(config, router.freeze())
        .token_generator(DebugTokenGenerator::<32>::default())
        .clock(now)
        .build()
        .unwrap()
}

fn lifecycle(router: Router) -> Lifecycle {
    lifecycle_with(router, config(&[]))
}

fn get(uri: &str, cookies: &[(&str, &str)]) -> http::Request<Vec<u8>> {
    request(Method::GET, uri, cookies, None, Vec::new())
}

fn request(
    method: Method,
    uri: &str,
    cookies: &[(&str, &str)],
    content_type: Option<&str>,
    body: Vec<u8>,
) -> http::Request<Vec<u8>> {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if !cookies.is_empty() {
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(COOKIE, header);
    }
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    builder.body(body).unwrap()
}

fn set_cookies(response: &HttpResponse) -> BTreeMap<String, Cookie<'static>> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| {
            let cookie = Cookie::parse(value.to_str().unwrap().to_owned()).unwrap();
            (cookie.name().to_owned(), cookie)
        })
        .collect()
}

fn body(response: &HttpResponse) -> &str {
    std::str::from_utf8(response.body()).unwrap()
}

fn text_route(method: Method, pattern: &str, controller: &str, action: &str) -> RouteDescriptor {
    RouteDescriptor::new(method, pattern, controller, action)
        .handler(|_| Ok(Response::ok().body_text("ok")))
}

/// A request without a session cookie receives a new, empty session expiring after the configured TTL.
#[test]
fn test_fresh_session_cookie() {
    let mut router = Router::new();
    router
        .register(text_route(Method::GET, "/", "Application", "index"))
        .unwrap();
    let lifecycle = lifecycle(router);

    let response = lifecycle.handle(get("/", &[]));
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    let session_cookie = &cookies["lifecycle-session"];
    assert_eq!(session_cookie.http_only(), Some(true));
    assert_eq!(session_cookie.path(), Some("/"));
    assert_eq!(
        session_cookie.max_age(),
        Some(cookie::time::Duration::seconds(86400))
    );

    let envelope = lifecycle
        .session_codec()
        .decode(session_cookie.value(), now())
        .unwrap();
    assert!(envelope.values.is_empty());
    assert_eq!(envelope.token.as_deref(), Some(FIRST_TOKEN));
    assert_eq!(envelope.expiry, now() + Duration::seconds(86400));

    // Nothing was logged in and no flash was sent.
    assert!(!cookies.contains_key("lifecycle-auth"));
    assert!(!cookies.contains_key("lifecycle-flash"));
}

/// A valid session that is not written to is not sent back, and keeps its token.
#[test]
fn test_unchanged_session_is_not_written() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/", "Application", "index").handler(|invocation| {
                let user = invocation.session().get("user").unwrap_or_default().to_owned();
                let token = invocation.session().authenticity_token().to_owned();
                Ok(Response::ok().body_text(format!("{user}/{token}")))
            }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);

    let values = BTreeMap::from([("user".to_owned(), "alice".to_owned())]);
    let raw = lifecycle
        .session_codec()
        .encode(&values, Some("sessiontoken"), now() + Duration::hours(1))
        .unwrap();

    let response = lifecycle.handle(get("/", &[("lifecycle-session", &raw)]));
    assert_eq!(body(&response), "alice/sessiontoken");
    assert!(!set_cookies(&response).contains_key("lifecycle-session"));
}

/// Tampered or expired session cookies are treated as absent and replaced by a fresh session.
#[test]
fn test_tampered_and_expired_sessions_are_replaced() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/", "Application", "index").handler(|invocation| {
                let user = invocation.session().get("user").unwrap_or("nobody").to_owned();
                Ok(Response::ok().body_text(user))
            }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);
    let values = BTreeMap::from([("user".to_owned(), "alice".to_owned())]);

    let valid = lifecycle
        .session_codec()
        .encode(&values, Some("sessiontoken"), now() + Duration::hours(1))
        .unwrap();
    let first = valid.chars().next().unwrap();
    let flipped = if first == 'a' { 'b' } else { 'a' };
    let tampered = format!("{flipped}{}", &valid[1..]);

    let response = lifecycle.handle(get("/", &[("lifecycle-session", &tampered)]));
    assert_eq!(body(&response), "nobody");
    let envelope = lifecycle
        .session_codec()
        .decode(set_cookies(&response)["lifecycle-session"].value(), now())
        .unwrap();
    assert_eq!(envelope.token.as_deref(), Some(FIRST_TOKEN));

    let expired = lifecycle
        .session_codec()
        .encode(&values, Some("sessiontoken"), now() - Duration::seconds(1))
        .unwrap();
    let response = lifecycle.handle(get("/", &[("lifecycle-session", &expired)]));
    assert_eq!(body(&response), "nobody");
    assert!(set_cookies(&response).contains_key("lifecycle-session"));
}

fn csrf_lifecycle(calls: Arc<AtomicUsize>) -> (Lifecycle, String) {
    let mut router = Router::new();
    router.global_filter(AuthenticityFilter);
    router
        .register(
            RouteDescriptor::new(Method::POST, "/items", "Items", "create").handler(
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Response::created().body_text("created"))
                },
            ),
        )
        .unwrap();
    let lifecycle = lifecycle(router);
    let session = lifecycle
        .session_codec()
        .encode(&BTreeMap::new(), Some("sessiontoken"), now() + Duration::hours(1))
        .unwrap();
    (lifecycle, session)
}

/// State-changing requests without the session's authenticity token are rejected before the handler runs.
#[test]
fn test_csrf_rejects_missing_and_wrong_tokens() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (lifecycle, session) = csrf_lifecycle(Arc::clone(&calls));

    let missing = request(
        Method::POST,
        "/items",
        &[("lifecycle-session", &session)],
        None,
        Vec::new(),
    );
    assert_eq!(lifecycle.handle(missing).status(), StatusCode::FORBIDDEN);

    let mut wrong = request(
        Method::POST,
        "/items",
        &[("lifecycle-session", &session)],
        None,
        Vec::new(),
    );
    wrong
        .headers_mut()
        .insert("x-csrf-token", "othertoken".parse().unwrap());
    assert_eq!(lifecycle.handle(wrong).status(), StatusCode::FORBIDDEN);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// The authenticity token is accepted from the header and from the form.
#[test]
fn test_csrf_accepts_matching_tokens() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (lifecycle, session) = csrf_lifecycle(Arc::clone(&calls));

    let mut with_header = request(
        Method::POST,
        "/items",
        &[("lifecycle-session", &session)],
        None,
        Vec::new(),
    );
    with_header
        .headers_mut()
        .insert("x-csrf-token", "sessiontoken".parse().unwrap());
    let response = lifecycle.handle(with_header);
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body(&response), "created");

    let with_form = request(
        Method::POST,
        "/items",
        &[("lifecycle-session", &session)],
        Some("application/x-www-form-urlencoded"),
        b"name=thing&authenticityToken=sessiontoken".to_vec(),
    );
    assert_eq!(lifecycle.handle(with_form).status(), StatusCode::CREATED);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Safe methods are never checked.
#[test]
fn test_csrf_ignores_get() {
    let mut router = Router::new();
    router.global_filter(AuthenticityFilter);
    router
        .register(text_route(Method::GET, "/items", "Items", "index"))
        .unwrap();
    let lifecycle = lifecycle(router);

    assert_eq!(lifecycle.handle(get("/items", &[])).status(), StatusCode::OK);
}

/// Filters run global first, then controller, then method filters, then the handler.
#[test]
fn test_filter_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let recorder = |label: &'static str| {
        let trace = Arc::clone(&trace);
        filter_fn(move |_, response| {
            trace.lock().unwrap().push(label);
            Ok(response.render(label, true))
        })
    };

    let mut router = Router::new();
    router.global_filter(recorder("global"));
    router.controller_filter("Items", recorder("controller-1"));
    router.controller_filter("Items", recorder("controller-2"));
    router.controller_filter("Other", recorder("other"));
    let handler_trace = Arc::clone(&trace);
    router
        .register(
            RouteDescriptor::new(Method::GET, "/items", "Items", "index")
                .filter(recorder("method"))
                .handler(move |_| {
                    handler_trace.lock().unwrap().push("handler");
                    Ok(Response::ok().body_text("done"))
                }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);

    let response = lifecycle.handle(get("/items", &[]));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        trace.lock().unwrap().as_slice(),
        &["global", "controller-1", "controller-2", "method", "handler"]
    );
}

/// A controller filter that ends the response prevents method filters and the handler from running.
#[test]
fn test_controller_filter_short_circuits() {
    let later = Arc::new(AtomicUsize::new(0));
    let method_counter = Arc::clone(&later);
    let handler_counter = Arc::clone(&later);

    let mut router = Router::new();
    router.controller_filter(
        "Admin",
        filter_fn(|_, _| Ok(Response::forbidden().body_text("no").end())),
    );
    router
        .register(
            RouteDescriptor::new(Method::GET, "/admin", "Admin", "index")
                .filter(filter_fn(move |_, response| {
                    method_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(response)
                }))
                .handler(move |_| {
                    handler_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Response::ok())
                }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);

    let response = lifecycle.handle(get("/admin", &[]));
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body(&response), "no");
    assert_eq!(later.load(Ordering::SeqCst), 0);
    // The new session is still delivered.
    assert!(set_cookies(&response).contains_key("lifecycle-session"));
}

/// A failing filter aborts the request with a 500.
#[test]
fn test_failing_filter_is_an_error() {
    let mut router = Router::new();
    router.global_filter(filter_fn(|_, _| Err(anyhow::anyhow!("database down"))));
    router
        .register(text_route(Method::GET, "/", "Application", "index"))
        .unwrap();
    let lifecycle = lifecycle(router);

    let response = lifecycle.handle(get("/", &[]));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body(&response).contains("database down"));
}

fn binding_lifecycle() -> Lifecycle {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/search/{id}", "Search", "index")
                .param(ParamSpec::new("id", ParamKind::Long))
                .param(ParamSpec::new("page", ParamKind::Int))
                .param(ParamSpec::new("ratio", ParamKind::Double))
                .param(ParamSpec::new("q", ParamKind::String))
                .param(ParamSpec::new("tag", ParamKind::Optional))
                .param(ParamSpec::new("since", ParamKind::LocalDate))
                .handler(|invocation| {
                    Ok(Response::ok().body_text(format!(
                        "{}|{}|{}|{}|{:?}|{:?}",
                        invocation.long("id").unwrap(),
                        invocation.int("page").unwrap(),
                        invocation.double("ratio").unwrap(),
                        invocation.string("q").unwrap(),
                        invocation.optional("tag"),
                        invocation.date("since"),
                    )))
                }),
        )
        .unwrap();
    lifecycle(router)
}

/// Blank or missing parameters bind to zero and the empty string.
#[test]
fn test_binding_defaults() {
    let lifecycle = binding_lifecycle();

    let response = lifecycle.handle(get("/search/7?page=&q=", &[]));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response), "7|0|0||None|None");

    let response = lifecycle.handle(get(
        "/search/7?page=3&ratio=0.5&q=rust%20lang&tag=new&since=2024-01-31",
        &[],
    ));
    assert_eq!(
        body(&response),
        "7|3|0.5|rust lang|Some(\"new\")|Some(2024-01-31)"
    );
}

/// A value that does not coerce to the declared number type fails the request.
#[test]
fn test_binding_failure_is_an_error() {
    let lifecycle = binding_lifecycle();

    let response = lifecycle.handle(get("/search/7?page=three", &[]));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[derive(serde::Deserialize)]
struct Item {
    name: String,
    amount: u32,
}

fn json_lifecycle() -> Lifecycle {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::POST, "/items", "Items", "create")
                .param(ParamSpec::new("item", ParamKind::Json))
                .handler(|invocation| {
                    let item: Item = invocation.json()?;
                    Ok(Response::created().body_text(format!("{} x{}", item.name, item.amount)))
                }),
        )
        .unwrap();
    lifecycle(router)
}

/// The JSON body is deserialized into the single JSON parameter; a malformed body is a 400.
#[test]
fn test_json_binding() {
    let lifecycle = json_lifecycle();

    let response = lifecycle.handle(request(
        Method::POST,
        "/items",
        &[],
        Some("application/json"),
        br#"{"name": "apple", "amount": 3}"#.to_vec(),
    ));
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body(&response), "apple x3");

    let response = lifecycle.handle(request(
        Method::POST,
        "/items",
        &[],
        Some("application/json"),
        b"{not json".to_vec(),
    ));
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// More than one JSON parameter cannot be registered.
#[test]
fn test_two_json_parameters_are_rejected() {
    let mut router = Router::new();
    let result = router.register(
        RouteDescriptor::new(Method::POST, "/items", "Items", "create")
            .param(ParamSpec::new("first", ParamKind::Json))
            .param(ParamSpec::new("second", ParamKind::Json))
            .handler(|_| Ok(Response::ok())),
    );
    assert!(result.is_err());
}

/// A flash message set before a redirect is readable by the next request only.
#[test]
fn test_flash_one_shot() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::POST, "/save", "Items", "save").handler(|invocation| {
                invocation.flash().set_success("done");
                Ok(Response::redirect("/show"))
            }),
        )
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/show", "Items", "show").handler(|invocation| {
                let success = invocation.flash().get("success").unwrap_or_default().to_owned();
                Ok(Response::ok().body_text(success))
            }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);

    let first = lifecycle.handle(request(Method::POST, "/save", &[], None, Vec::new()));
    assert_eq!(first.status(), StatusCode::FOUND);
    assert_eq!(first.headers()[LOCATION], "/show");
    let flash = set_cookies(&first)["lifecycle-flash"].value().to_owned();
    assert_eq!(flash, "success:done");

    let second = lifecycle.handle(get("/show", &[("lifecycle-flash", &flash)]));
    assert_eq!(body(&second), "done");
    let cleared = &set_cookies(&second)["lifecycle-flash"];
    assert_eq!(cleared.value(), "");
    assert_eq!(cleared.max_age(), Some(cookie::time::Duration::ZERO));

    let third = lifecycle.handle(get("/show", &[]));
    assert_eq!(body(&third), "");
    assert!(!set_cookies(&third).contains_key("lifecycle-flash"));
}

/// A request that received a flash clears the cookie, even if it puts new messages.
#[test]
fn test_received_flash_is_cleared_even_with_new_content() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/again", "Items", "again").handler(|invocation| {
                let success = invocation.flash().get("success").unwrap_or_default().to_owned();
                invocation.flash().set_warning("again");
                Ok(Response::ok().body_text(success))
            }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);

    let response = lifecycle.handle(get("/again", &[("lifecycle-flash", "success:done")]));
    assert_eq!(body(&response), "done");
    let cleared = &set_cookies(&response)["lifecycle-flash"];
    assert_eq!(cleared.value(), "");
    assert_eq!(cleared.max_age(), Some(cookie::time::Duration::ZERO));

    // Without a received flash, the new message is sent.
    let response = lifecycle.handle(get("/again", &[]));
    assert_eq!(set_cookies(&response)["lifecycle-flash"].value(), "warning:again");
}

fn form_lifecycle() -> Lifecycle {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::POST, "/upload", "Files", "upload").handler(
                |invocation| {
                    let form = invocation.form();
                    let file = form.file();
                    Ok(Response::ok().body_text(format!(
                        "{}|{}|{}|{}|{}|{}",
                        form.is_submitted(),
                        form.value("name"),
                        file.map(|file| file.name.as_str()).unwrap_or("-"),
                        file.and_then(|file| file.file_name.as_deref()).unwrap_or("-"),
                        file.and_then(|file| file.content_type.as_deref()).unwrap_or("-"),
                        file.map(|file| String::from_utf8_lossy(&file.content).into_owned())
                            .unwrap_or_default(),
                    )))
                },
            ),
        )
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::POST, "/register", "Users", "register").handler(
                |invocation| {
                    let form = invocation.form();
                    form.expect_range_length("name", 3, 20);
                    form.expect_email("email");
                    form.expect_url("website");
                    form.expect_min_value("age", 18.0);
                    form.expect_max_value("age", 120.0);
                    form.expect_exact_match("confirm", "password");
                    form.expect_match_any("color", &["red", "green"]);
                    if form.is_valid() {
                        return Ok(Response::ok().body_text("valid"));
                    }
                    let errors = form
                        .errors()
                        .values()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("\n");
                    Ok(Response::bad_request().body_text(errors))
                },
            ),
        )
        .unwrap();
    lifecycle(router)
}

const URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// Multipart bodies yield both plain values and uploaded files.
#[test]
fn test_multipart_upload() {
    let body_bytes = concat!(
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"name\"\r\n",
        "\r\n",
        "bob\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "hello\r\n",
        "--XYZ--\r\n",
    );
    let response = form_lifecycle().handle(request(
        Method::POST,
        "/upload",
        &[],
        Some("multipart/form-data; boundary=XYZ"),
        body_bytes.as_bytes().to_vec(),
    ));

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response), "true|bob|upload|a.txt|text/plain|hello");
}

/// A multipart body that can not be parsed is answered with 400, without calling the handler.
#[test]
fn test_malformed_form_body() {
    let lifecycle = form_lifecycle();

    let response = lifecycle.handle(request(
        Method::POST,
        "/upload",
        &[],
        Some("multipart/form-data"),
        b"name=bob".to_vec(),
    ));
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!body(&response).contains("bob"));
}

/// Validation failures are collected per field and leave the response to the handler.
#[test]
fn test_form_validation() {
    let lifecycle = form_lifecycle();
    let submit = |fields: &str| {
        lifecycle.handle(request(
            Method::POST,
            "/register",
            &[],
            Some(URL_ENCODED),
            fields.as_bytes().to_vec(),
        ))
    };

    let invalid = submit(
        "name=al&email=nobody&website=ftp%3A%2F%2Fexample.com&age=200\
         &password=secret&confirm=Secret&color=pink",
    );
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body(&invalid),
        [
            "age must be at most 120",
            "color has an invalid value",
            "confirm must match password",
            "email must be a valid email address",
            "name must have between 3 and 20 characters",
            "website must be a valid URL",
        ]
        .join("\n")
    );

    let valid = submit(
        "name=alice&email=alice%40example.com&website=https%3A%2F%2Fexample.com&age=30\
         &password=secret&confirm=secret&color=red",
    );
    assert_eq!(valid.status(), StatusCode::OK);
    assert_eq!(body(&valid), "valid");
}

fn authentication_lifecycle(extra: &[(&str, &str)]) -> Lifecycle {
    let config = config(extra);
    let mut router = Router::new();
    router.controller_filter("Account", AuthenticationFilter::from_config(&config));
    router
        .register(
            RouteDescriptor::new(Method::POST, "/login", "Login", "login")
                .param(ParamSpec::new("user", ParamKind::String))
                .handler(|invocation| {
                    let user = invocation.string("user").unwrap_or_default().to_owned();
                    let valid = invocation
                        .context()
                        .valid_login(&user, || Ok(user == "alice"))?;
                    if valid {
                        invocation.authentication().login(user).remember_me(true);
                        Ok(Response::redirect("/account"))
                    } else {
                        Ok(Response::unauthorized().body_text("invalid"))
                    }
                }),
        )
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/account", "Account", "show").handler(
                |invocation| {
                    let subject = invocation
                        .authentication()
                        .subject()
                        .unwrap_or_default()
                        .to_owned();
                    Ok(Response::ok().body_text(subject))
                },
            ),
        )
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/nick", "Login", "nick")
                .param(ParamSpec::new("subject", ParamKind::String))
                .handler(|invocation| {
                    let nick = invocation.string("subject").unwrap_or_default().to_owned();
                    invocation.session().put("subject", nick);
                    Ok(Response::ok().body_text("ok"))
                }),
        )
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::POST, "/logout", "Account", "logout").handler(
                |invocation| {
                    invocation.authentication().logout();
                    Ok(Response::redirect("/"))
                },
            ),
        )
        .unwrap();
    lifecycle_with(router, config)
}

/// A login with remember-me issues an authentication cookie valid for the remember duration,
/// which grants access to protected routes until logout.
#[test]
fn test_login_and_logout() {
    let lifecycle = authentication_lifecycle(&[]);

    let denied = lifecycle.handle(get("/account", &[]));
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let login = lifecycle.handle(request(Method::POST, "/login?user=alice", &[], None, Vec::new()));
    assert_eq!(login.status(), StatusCode::FOUND);
    let auth_cookie = set_cookies(&login)["lifecycle-auth"].clone();
    assert_eq!(
        auth_cookie.max_age(),
        Some(cookie::time::Duration::seconds(1_209_600))
    );
    let envelope = lifecycle
        .authentication_codec()
        .decode(auth_cookie.value(), now())
        .unwrap();
    assert_eq!(envelope.token, None);
    assert_eq!(envelope.values["subject"], "alice");

    let account = lifecycle.handle(get("/account", &[("lifecycle-auth", auth_cookie.value())]));
    assert_eq!(account.status(), StatusCode::OK);
    assert_eq!(body(&account), "alice");
    // An unchanged authentication is not written back.
    assert!(!set_cookies(&account).contains_key("lifecycle-auth"));

    let logout = lifecycle.handle(request(
        Method::POST,
        "/logout",
        &[("lifecycle-auth", auth_cookie.value())],
        None,
        Vec::new(),
    ));
    let cleared = &set_cookies(&logout)["lifecycle-auth"];
    assert_eq!(cleared.max_age(), Some(cookie::time::Duration::ZERO));
}

/// Unauthenticated requests are redirected to the configured login page.
#[test]
fn test_authentication_redirect() {
    let lifecycle = authentication_lifecycle(&[("authentication.redirect.login", "/login")]);

    let response = lifecycle.handle(get("/account", &[]));
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");
}

/// Subjects are locked out after too many failed logins, even with the right password.
#[test]
fn test_login_lockout() {
    let lifecycle = authentication_lifecycle(&[("authentication.lock", "2")]);
    let attempt = |user: &str| {
        lifecycle
            .handle(request(
                Method::POST,
                &format!("/login?user={user}"),
                &[],
                None,
                Vec::new(),
            ))
            .status()
    };

    assert_eq!(attempt("bob"), StatusCode::UNAUTHORIZED);
    assert_eq!(lifecycle.login_lock().failures("bob"), 1);

    for _ in 0..3 {
        lifecycle.login_lock().record_failure("alice");
    }
    assert!(lifecycle.login_lock().is_locked("alice"));
    assert_eq!(attempt("alice"), StatusCode::UNAUTHORIZED);

    lifecycle.login_lock().reset("alice");
    assert_eq!(attempt("alice"), StatusCode::FOUND);
}

/// A session cookie presented as the authentication cookie does not log anybody in,
/// even when the session holds a `subject` value chosen by the client.
#[test]
fn test_session_cookie_is_not_an_authentication_cookie() {
    let lifecycle = authentication_lifecycle(&[]);

    let nick = lifecycle.handle(get("/nick?subject=admin", &[]));
    assert_eq!(nick.status(), StatusCode::OK);
    let session_cookie = set_cookies(&nick)["lifecycle-session"].value().to_owned();
    let envelope = lifecycle
        .session_codec()
        .decode(&session_cookie, now())
        .unwrap();
    assert_eq!(envelope.values["subject"], "admin");

    assert!(lifecycle
        .authentication_codec()
        .decode(&session_cookie, now())
        .is_err());

    let replayed = lifecycle.handle(get("/account", &[("lifecycle-auth", &session_cookie)]));
    assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);
    assert_ne!(body(&replayed), "admin");
}

/// Unknown routes are answered with 404 and carry the security headers.
#[test]
fn test_route_not_found() {
    let lifecycle = lifecycle(Router::new());

    let response = lifecycle.handle(get("/nowhere", &[]));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    assert_eq!(response.headers()["x-xss-protection"], "1");
    assert!(!response.headers().contains_key(SET_COOKIE));
}

/// Handler failures are shown in detail in development mode only.
#[test]
fn test_error_detail_in_dev_mode_only() {
    let router = || {
        let mut router = Router::new();
        router
            .register(
                RouteDescriptor::new(Method::GET, "/", "Application", "index")
                    .handler(|_| Err(anyhow::anyhow!("disk <full>"))),
            )
            .unwrap();
        router
    };

    let prod = lifecycle(router()).handle(get("/", &[]));
    assert_eq!(prod.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body(&prod).contains("disk"));

    let dev = lifecycle_with(router(), config(&[("application.mode", "dev")])).handle(get("/", &[]));
    assert_eq!(dev.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body(&dev).contains("handler `Application.index` failed"));
    assert!(body(&dev).contains("disk &lt;full&gt;"));
}

/// The language cookie wins over the `Accept-Language` header, which wins over the default.
#[test]
fn test_locale_resolution() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/", "Application", "index").handler(|invocation| {
                Ok(Response::ok().body_text(invocation.context().locale().to_owned()))
            }),
        )
        .unwrap();
    let lifecycle = lifecycle(router);

    assert_eq!(body(&lifecycle.handle(get("/", &[]))), "en");

    let mut with_header = get("/", &[]);
    with_header
        .headers_mut()
        .insert("accept-language", "de-DE,de;q=0.9,en;q=0.8".parse().unwrap());
    assert_eq!(body(&lifecycle.handle(with_header)), "de-DE");

    let mut with_cookie = get("/", &[("lifecycle-language", "fr")]);
    with_cookie
        .headers_mut()
        .insert("accept-language", "de-DE".parse().unwrap());
    assert_eq!(body(&lifecycle.handle(with_cookie)), "fr");
}

struct EchoTemplates;

impl TemplateEngine for EchoTemplates {
    fn render(&self, context: &TemplateContext<'_>) -> anyhow::Result<String> {
        Ok(format!(
            "{} {} {}",
            context.template,
            serde_json::Value::Object(context.content.clone()),
            context.flash.get("error").unwrap_or("-"),
        ))
    }
}

/// Responses without a body are rendered from the accumulated content.
#[test]
fn test_rendering() {
    let mut router = Router::new();
    router.global_filter(filter_fn(|_, response| Ok(response.render("from_filter", 1))));
    router
        .register(
            RouteDescriptor::new(Method::GET, "/", "Application", "index").handler(|invocation| {
                invocation.flash().set_error("oops");
                Ok(Response::ok().render("title", "home"))
            }),
        )
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/custom", "Application", "custom")
                .handler(|_| Ok(Response::ok().template("Shared/page.html"))),
        )
        .unwrap();
    let lifecycle = Lifecycle::builder(config(&[]), router.freeze())
        .template_engine(EchoTemplates)
        .clock(now)
        .build()
        .unwrap();

    let response = lifecycle.handle(get("/", &[]));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=UTF-8");
    assert_eq!(
        body(&response),
        r#"Application/index.html {"from_filter":1,"title":"home"} oops"#
    );

    let response = lifecycle.handle(get("/custom", &[]));
    assert!(body(&response).starts_with("Shared/page.html "));
}

/// Without a template engine, a response that needs rendering is an error.
#[test]
fn test_rendering_without_engine() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/", "Application", "index")
                .handler(|_| Ok(Response::ok())),
        )
        .unwrap();

    let response = lifecycle(router).handle(get("/", &[]));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

/// Encrypted sessions round-trip through the lifecycle.
#[test]
fn test_encrypted_session() {
    let mut router = Router::new();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/count", "Counter", "count").handler(|invocation| {
                let count: u32 = invocation
                    .session()
                    .get("count")
                    .and_then(|count| count.parse::<u32>().ok())
                    .unwrap_or(0)
                    + 1;
                invocation.session().put("count", count.to_string());
                Ok(Response::ok().body_text(count.to_string()))
            }),
        )
        .unwrap();
    let lifecycle = lifecycle_with(router, config(&[("session.cookie.encryption", "true")]));

    let first = lifecycle.handle(get("/count", &[]));
    assert_eq!(body(&first), "1");
    let session = set_cookies(&first)["lifecycle-session"].value().to_owned();
    assert!(!session.contains('|'));

    let second = lifecycle.handle(get("/count", &[("lifecycle-session", &session)]));
    assert_eq!(body(&second), "2");
}

/// The dispatcher runs the lifecycle on a worker and turns panics into 500s.
#[async_std::test]
async fn test_dispatcher() {
    let mut router = Router::new();
    router
        .register(text_route(Method::GET, "/", "Application", "index"))
        .unwrap();
    router
        .register(
            RouteDescriptor::new(Method::GET, "/panic", "Application", "panic")
                .handler(|_| panic!("worker exploded")),
        )
        .unwrap();
    let dispatcher = request_lifecycle::Dispatcher::new(lifecycle_with(
        router,
        config(&[("application.workers", "2")]),
    ));

    let responses = futures::future::join_all((0..8).map(|_| dispatcher.dispatch(get("/", &[])))).await;
    assert!(responses
        .iter()
        .all(|response| response.status() == StatusCode::OK));

    let response = dispatcher.dispatch(get("/panic", &[])).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
