//! Request routing: map path templates and HTTP methods to callback chains.
//!
//! A binding pairs a method and a [`RouteTemplate`] with an ordered chain of
//! [`Callback`]s, typically a few [`validators`] followed by a terminal
//! handler. Bindings are matched in declaration order; the first template that
//! matches the request path wins. `HEAD` requests fall back to `GET` bindings.
//!
//! Callbacks run synchronously (the server offloads [`Router::dispatch`] to a
//! worker thread) and stop as soon as one of them marks the response ready.
//! Errors they return are offered to the registered exception handlers in
//! order; unclaimed errors become a `400` (invalid JSON body) or a `500`.
//!
//! `OPTIONS` and `TRACE` are answered by the router itself.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::http::{Headers, InvalidJsonBody, Method, Request, Response, StatusCode};
use crate::runtime::offload::panic_message;
use crate::runtime::task::BoxError;

pub mod static_files;
pub mod template;
pub mod validators;

pub use template::{PathParams, RouteTemplate};

/// One step of a binding's callback chain.
pub type Callback = Arc<dyn Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync>;

/// Offered every error a callback chain returns, until one commits the response.
pub type ExceptionHandler = Arc<dyn Fn(&HandlerError, &mut Response) + Send + Sync>;

/// Wraps a closure into a [`Callback`].
///
/// # Examples
///
/// ```
/// use coweb::router::{Router, callback};
///
/// let mut router = Router::new();
/// router
///     .get("/ping", [callback(|_req, res| {
///         res.set_html("pong").mark_ready();
///         Ok(())
///     })])
///     .unwrap();
/// ```
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Errors raised by callbacks while handling a request.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The body was declared or required to be JSON but does not parse.
    #[error(transparent)]
    InvalidJson(#[from] InvalidJsonBody),

    /// Nothing can serve the request here; the default callback answers instead.
    #[error("no resource matched the request")]
    NoMatch,

    /// Any application-specific failure.
    #[error(transparent)]
    Application(BoxError),
}

impl HandlerError {
    /// Wraps an application error.
    pub fn custom(error: impl Into<BoxError>) -> Self {
        Self::Application(error.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Application(Box::new(error))
    }
}

/// Configuration errors detected while binding routes.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route template `{template}`: {reason}")]
    InvalidTemplate {
        template: String,
        reason: &'static str,
    },

    #[error("routes cannot be bound to {0}")]
    UnroutableMethod(Method),

    #[error("no content type known for `{}`", path.display())]
    UnknownExtension { path: PathBuf },

    #[error("`{}` is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    #[error("`{}` is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("failed to read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const NOT_FOUND_PAGE: &str = "<h1>404</h1> Resource not found <br/> :(";
const INTERNAL_ERROR_PAGE: &str =
    "<h1>500</h1> Unhandled exception happened while processing the request <br/> :(";
const SERVER_WIDE_ALLOW: &str = "GET, HEAD, PUT, POST, DELETE";

// A single binding of a method + template to a callback chain.
struct Route {
    method: Method,
    template: RouteTemplate,
    chain: Vec<Callback>,
}

impl Route {
    // Forces JSON parsing up front so malformed bodies fail uniformly, then
    // runs the chain until a callback commits the response.
    fn run(&self, request: &Request, response: &mut Response) -> Result<(), HandlerError> {
        if is_json(request.content_type()) {
            request.json()?;
        }
        for callback in &self.chain {
            if response.is_ready() {
                break;
            }
            callback(request, response)?;
        }
        Ok(())
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

/// HTTP request router.
///
/// Built once before the server starts and shared read-only afterwards.
///
/// # Examples
///
/// ```
/// use coweb::http::{Request, StatusCode};
/// use coweb::router::{Router, callback, validators};
///
/// let mut router = Router::new();
/// router
///     .get("/{number}/squared", [
///         validators::path_param_int("number"),
///         callback(|req, res| {
///             let n: i64 = req.path_param("number").unwrap_or("0").parse().unwrap_or(0);
///             res.set_json(&serde_json::json!({"number": n, "squared": n * n}))?;
///             Ok(())
///         }),
///     ])
///     .unwrap();
///
/// let response = router.dispatch(Request::parse(b"GET /12/squared HTTP/1.1\r\n\r\n").unwrap());
/// assert_eq!(response.status(), StatusCode::Ok);
///
/// let response = router.dispatch(Request::parse(b"GET /x/squared HTTP/1.1\r\n\r\n").unwrap());
/// assert_eq!(response.status(), StatusCode::BadRequest);
/// ```
pub struct Router {
    routes: Vec<Route>,
    default_callback: Callback,
    exception_handlers: Vec<ExceptionHandler>,
    default_headers: Headers,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("exception_handlers", &self.exception_handlers.len())
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Creates a router with no bindings and the built-in 404 default callback.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            default_callback: callback(not_found),
            exception_handlers: Vec::new(),
            default_headers: Headers::new(),
        }
    }

    /// Binds `chain` to requests with `method` whose path matches `template`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::InvalidTemplate`] if `template` does not compile.
    /// - [`RouteError::UnroutableMethod`] for `OPTIONS` and `TRACE`, which the
    ///   router answers itself.
    pub fn bind(
        &mut self,
        method: Method,
        template: &str,
        chain: impl IntoIterator<Item = Callback>,
    ) -> Result<&mut Self, RouteError> {
        if !Method::ROUTABLE.contains(&method) {
            return Err(RouteError::UnroutableMethod(method));
        }
        let template = RouteTemplate::parse(template)?;
        debug!(%method, %template, "route bound");
        self.routes.push(Route {
            method,
            template,
            chain: chain.into_iter().collect(),
        });
        Ok(self)
    }

    /// Binds a `GET` chain. See [`bind`](Self::bind).
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTemplate`] if `template` does not compile.
    pub fn get(
        &mut self,
        template: &str,
        chain: impl IntoIterator<Item = Callback>,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Method::Get, template, chain)
    }

    /// Binds a `HEAD` chain, taking precedence over the `GET` fallback.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTemplate`] if `template` does not compile.
    pub fn head(
        &mut self,
        template: &str,
        chain: impl IntoIterator<Item = Callback>,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Method::Head, template, chain)
    }

    /// Binds a `POST` chain.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTemplate`] if `template` does not compile.
    pub fn post(
        &mut self,
        template: &str,
        chain: impl IntoIterator<Item = Callback>,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Method::Post, template, chain)
    }

    /// Binds a `PUT` chain.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTemplate`] if `template` does not compile.
    pub fn put(
        &mut self,
        template: &str,
        chain: impl IntoIterator<Item = Callback>,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Method::Put, template, chain)
    }

    /// Binds a `DELETE` chain.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTemplate`] if `template` does not compile.
    pub fn delete(
        &mut self,
        template: &str,
        chain: impl IntoIterator<Item = Callback>,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Method::Delete, template, chain)
    }

    /// Replaces the callback answering requests no binding matched.
    pub fn set_default_callback(&mut self, callback: Callback) -> &mut Self {
        self.default_callback = callback;
        self
    }

    /// Appends an exception handler. Handlers are tried in registration order
    /// until one marks the response ready.
    pub fn add_exception_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&HandlerError, &mut Response) + Send + Sync + 'static,
    {
        self.exception_handlers.push(Arc::new(handler));
        self
    }

    /// Sets a header on every dispatched response. Callbacks may override it.
    pub fn add_default_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.default_headers.set(name, value);
        self
    }

    /// Adds `origin` to the `Access-Control-Allow-Origin` default header.
    pub fn allow_origin(&mut self, origin: &str) -> &mut Self {
        match self.default_headers.get_mut("Access-Control-Allow-Origin") {
            Some(origins) => {
                origins.push_str(", ");
                origins.push_str(origin);
            }
            None => self.default_headers.insert("Access-Control-Allow-Origin", origin),
        }
        self
    }

    /// Return the number of bindings.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if nothing has been bound.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Creates the blank response answering `request`, carrying the default
    /// headers.
    pub fn response_for(&self, request: &Request) -> Response {
        let mut response = Response::for_request(request);
        for (name, value) in self.default_headers.iter() {
            response.set_header(name, value);
        }
        response
    }

    /// Produces the response to `request`.
    ///
    /// Never fails: every error a callback raises is resolved into a
    /// response here, and a panicking callback yields the `500` page.
    pub fn dispatch(&self, mut request: Request) -> Response {
        debug!(method = %request.method(), path = request.path(), "dispatching");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.respond(&mut request)));
        let mut response = match outcome {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(method = %request.method(), path = request.path(), %message, "callback panicked");
                let mut response = self.response_for(&request);
                internal_error(&mut response);
                response
            }
        };
        response.mark_ready();
        response
    }

    fn respond(&self, request: &mut Request) -> Response {
        let mut response = self.response_for(request);
        match request.method() {
            Method::Trace => {
                let echo = request.raw_header().unwrap_or_default().to_owned();
                response.set_status(StatusCode::Ok).set_body(echo, "message/http");
            }
            Method::Options => self.options(request, &mut response),
            method => match self.find(method, request.path()) {
                Some((route, params)) => {
                    request.set_path_params(params);
                    if let Err(error) = route.run(request, &mut response) {
                        self.handle_error(error, request, &mut response);
                    }
                }
                None => self.run_default(request, &mut response),
            },
        }
        response
    }

    fn find_exact(&self, method: Method, path: &str) -> Option<(&Route, PathParams)> {
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| route.template.matches(path).map(|params| (route, params)))
    }

    fn find(&self, method: Method, path: &str) -> Option<(&Route, PathParams)> {
        self.find_exact(method, path).or_else(|| {
            if method == Method::Head {
                self.find_exact(Method::Get, path)
            } else {
                None
            }
        })
    }

    fn options(&self, request: &Request, response: &mut Response) {
        if request.path() == "*" {
            response.set_header("Allow", SERVER_WIDE_ALLOW);
        } else {
            let allowed: Vec<&str> = Method::ROUTABLE
                .into_iter()
                .filter(|&method| self.find(method, request.path()).is_some())
                .map(Method::as_str)
                .collect();
            if allowed.is_empty() {
                not_found_page(response);
            } else {
                response.set_header("Allow", allowed.join(", "));
            }
        }

        if let Some(headers) = request.header("Access-Control-Request-Headers") {
            response.set_header("Access-Control-Allow-Headers", headers);
        }
        if let Some(methods) = request.header("Access-Control-Request-Methods") {
            response.set_header("Access-Control-Allow-Methods", methods);
        }
    }

    fn run_default(&self, request: &Request, response: &mut Response) {
        match (self.default_callback)(request, response) {
            Ok(()) => {}
            Err(HandlerError::NoMatch) => not_found_page(response),
            Err(error) => self.handle_error(error, request, response),
        }
    }

    fn handle_error(&self, error: HandlerError, request: &Request, response: &mut Response) {
        if matches!(error, HandlerError::NoMatch) {
            return self.run_default(request, response);
        }

        for handler in &self.exception_handlers {
            if response.is_ready() {
                return;
            }
            handler(&error, response);
        }
        if response.is_ready() {
            return;
        }

        match error {
            HandlerError::InvalidJson(error) => {
                let message = format!("malformed json as body: {}", error.reason());
                response.reject(&message, "body", None);
            }
            error => {
                warn!(method = %request.method(), path = request.path(), %error, "unhandled error");
                internal_error(response);
            }
        }
    }
}

/// Built-in default callback: an HTML `404 Not Found` page.
///
/// # Errors
///
/// Never fails; the signature matches [`Callback`].
pub fn not_found(_request: &Request, response: &mut Response) -> Result<(), HandlerError> {
    not_found_page(response);
    Ok(())
}

/// Replaces whatever `response` holds with the HTML `404` page.
pub fn not_found_page(response: &mut Response) {
    response
        .set_status(StatusCode::NotFound)
        .set_html(NOT_FOUND_PAGE)
        .mark_ready();
}

/// Replaces whatever `response` holds with the HTML `500` page.
pub fn internal_error(response: &mut Response) {
    response
        .set_status(StatusCode::InternalServerError)
        .set_html(INTERNAL_ERROR_PAGE)
        .mark_ready();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap()
    }

    fn status(code: StatusCode) -> Callback {
        callback(move |_req, res| {
            res.set_status(code).mark_ready();
            Ok(())
        })
    }

    fn body_text(response: Response) -> String {
        let wire = response.into_bytes();
        let wire = String::from_utf8(wire.to_vec()).unwrap();
        wire.split_once("\r\n\r\n").unwrap().1.to_owned()
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::default();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn empty_router_returns_404_page() {
        let router = Router::new();
        let res = router.dispatch(make_request("GET", "/"));
        assert_eq!(res.status(), StatusCode::NotFound);
        assert!(body_text(res).contains("404"));
    }

    #[test]
    fn get_does_not_match_post() {
        let mut router = Router::new();
        router.get("/hello", [status(StatusCode::Ok)]).unwrap();
        let res = router.dispatch(make_request("POST", "/hello"));
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[test]
    fn first_declared_binding_wins() {
        let mut router = Router::new();
        router
            .get("/users/{id}", [status(StatusCode::Ok)])
            .unwrap()
            .get("/users/me", [status(StatusCode::Accepted)])
            .unwrap();
        assert_eq!(router.dispatch(make_request("GET", "/users/me")).status(), StatusCode::Ok);
    }

    #[test]
    fn captures_reach_callbacks() {
        let mut router = Router::new();
        router
            .get(
                "/users/{userId}/notes/{noteId}",
                [callback(|req, res| {
                    let body = format!("{}:{}", req.path_param("userId").unwrap(), req.path_param("noteId").unwrap());
                    res.set_html(body);
                    Ok(())
                })],
            )
            .unwrap();
        let res = router.dispatch(make_request("GET", "/users/42/notes/7"));
        assert_eq!(body_text(res), "42:7");
    }

    #[test]
    fn chain_stops_once_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut router = Router::new();
        router
            .post(
                "/x",
                [
                    status(StatusCode::Created),
                    callback(move |_req, _res| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                ],
            )
            .unwrap();
        let res = router.dispatch(make_request("POST", "/x"));
        assert_eq!(res.status(), StatusCode::Created);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn head_falls_back_to_get() {
        let mut router = Router::new();
        router
            .get("/page", [callback(|_req, res| {
                res.set_html("0123456789");
                Ok(())
            })])
            .unwrap();
        let res = router.dispatch(make_request("HEAD", "/page"));
        assert_eq!(res.status(), StatusCode::Ok);
        let wire = String::from_utf8(res.into_bytes().to_vec()).unwrap();
        assert!(wire.contains("Content-Length: 10\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn explicit_head_binding_takes_precedence() {
        let mut router = Router::new();
        router
            .get("/page", [status(StatusCode::Ok)])
            .unwrap()
            .head("/page", [status(StatusCode::NoContent)])
            .unwrap();
        assert_eq!(router.dispatch(make_request("HEAD", "/page")).status(), StatusCode::NoContent);
    }

    #[test]
    fn options_lists_matching_methods() {
        let mut router = Router::new();
        router
            .get("/notes/{id}", [status(StatusCode::Ok)])
            .unwrap()
            .delete("/notes/{id}", [status(StatusCode::Ok)])
            .unwrap();
        let raw = b"OPTIONS /notes/3 HTTP/1.1\r\nAccess-Control-Request-Headers: content-type\r\nAccess-Control-Request-Methods: DELETE\r\n\r\n";
        let res = router.dispatch(Request::parse(raw).unwrap());
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("Allow"), Some("GET, HEAD, DELETE"));
        assert_eq!(res.headers().get("Access-Control-Allow-Headers"), Some("content-type"));
        assert_eq!(res.headers().get("Access-Control-Allow-Methods"), Some("DELETE"));

        let res = router.dispatch(make_request("OPTIONS", "/missing"));
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[test]
    fn options_star_is_server_wide() {
        let res = Router::new().dispatch(make_request("OPTIONS", "*"));
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("Allow"), Some(SERVER_WIDE_ALLOW));
    }

    #[test]
    fn trace_echoes_header_block() {
        let res = Router::new().dispatch(make_request("TRACE", "/anything"));
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("Content-Type"), Some("message/http"));
        assert_eq!(body_text(res), "TRACE /anything HTTP/1.1\r\nHost: localhost\r\n");
    }

    #[test]
    fn unroutable_methods_are_rejected() {
        let mut router = Router::new();
        let err = router.bind(Method::Trace, "/t", []).unwrap_err();
        assert!(matches!(err, RouteError::UnroutableMethod(Method::Trace)));
    }

    #[test]
    fn malformed_json_body_is_400_before_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut router = Router::new();
        router
            .post("/notes", [callback(move |_req, _res| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })])
            .unwrap();
        let raw = b"POST /notes HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\n{oops";
        let res = router.dispatch(Request::parse(raw).unwrap());
        assert_eq!(res.status(), StatusCode::BadRequest);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let body: Value = serde_json::from_str(&body_text(res)).unwrap();
        assert!(body["message"].as_str().unwrap().starts_with("malformed json as body: "));
        assert_eq!(body["location"], "body");
    }

    #[test]
    fn exception_handlers_are_offered_in_order() {
        #[derive(Debug, Error)]
        #[error("note is locked")]
        struct Locked;

        let mut router = Router::new();
        router
            .get("/locked", [callback(|_req, _res| Err(HandlerError::custom(Locked)))])
            .unwrap()
            .add_exception_handler(|_error, res| {
                res.add_header("X-Seen", "first");
            })
            .add_exception_handler(|error, res| {
                if let HandlerError::Application(inner) = error {
                    if inner.is::<Locked>() {
                        res.set_status(StatusCode::Conflict).mark_ready();
                    }
                }
            })
            .add_exception_handler(|_error, res| {
                res.set_status(StatusCode::ImATeapot).mark_ready();
            });
        let res = router.dispatch(make_request("GET", "/locked"));
        assert_eq!(res.status(), StatusCode::Conflict);
        assert_eq!(res.headers().get("X-Seen"), Some("first"));
    }

    #[test]
    fn unclaimed_errors_become_500() {
        let mut router = Router::new();
        router
            .get("/boom", [callback(|_req, _res| Err(HandlerError::custom("boom")))])
            .unwrap();
        let res = router.dispatch(make_request("GET", "/boom"));
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[test]
    fn panicking_callback_answers_like_the_request() {
        let mut router = Router::new();
        router
            .get("/panic", [callback(|_req, _res| panic!("handler exploded"))])
            .unwrap()
            .allow_origin("http://a.test");

        let res = router.dispatch(make_request("GET", "/panic"));
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(res.headers().get("Access-Control-Allow-Origin"), Some("http://a.test"));
        assert_eq!(body_text(res), INTERNAL_ERROR_PAGE);

        let raw = b"HEAD /panic HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
        let res = router.dispatch(Request::parse(raw).unwrap());
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(res.is_persistent());
        let wire = String::from_utf8(res.into_bytes().to_vec()).unwrap();
        assert!(wire.contains(&format!("Content-Length: {}\r\n", INTERNAL_ERROR_PAGE.len())));
        assert!(wire.contains("Connection: keep-alive\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn default_callback_miss_gets_the_404_page() {
        let mut router = Router::new();
        router.set_default_callback(callback(|_req, _res| Err(HandlerError::NoMatch)));
        let res = router.dispatch(make_request("GET", "/nothing"));
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(body_text(res), NOT_FOUND_PAGE);
    }

    #[test]
    fn custom_default_callback() {
        let mut router = Router::new();
        router.set_default_callback(status(StatusCode::Gone));
        assert_eq!(router.dispatch(make_request("GET", "/nothing")).status(), StatusCode::Gone);
    }

    #[test]
    fn default_headers_and_origins() {
        let mut router = Router::new();
        router
            .add_default_header("X-Powered-By", "coweb")
            .allow_origin("http://a.test")
            .allow_origin("http://b.test");
        let res = router.dispatch(make_request("GET", "/"));
        assert_eq!(res.headers().get("x-powered-by"), Some("coweb"));
        assert_eq!(
            res.headers().get("Access-Control-Allow-Origin"),
            Some("http://a.test, http://b.test")
        );
    }
}
