//! Parsed HTTP/1.1 requests.
//!
//! A [`Request`] is produced by the incremental pipeline in
//! [`parser`](super::parser) and is immutable afterwards, except for the
//! lazily parsed JSON body and the path parameters the router injects.

use std::cell::OnceCell;
use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use super::parser::{self, Limits, RequestError};
use super::{Headers, Method};

/// Content type recorded for requests that did not declare one.
pub const UNKNOWN_CONTENT_TYPE: &str = "UNKNOWN_CONTENT_TYPE";

/// The request body could not be parsed as JSON.
///
/// Distinct from a malformed request: the HTTP framing was fine, only the
/// payload is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("body is not valid JSON: {reason}")]
pub struct InvalidJsonBody {
    reason: String,
}

impl InvalidJsonBody {
    /// The JSON parser's description of the problem.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A fully parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use coweb::http::{Method, Request};
///
/// let raw = b"GET /hello/?name=world#top HTTP/1.1\r\nHost: localhost\r\nCookie: id=7; theme=dark\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query(), "name=world");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.fragment(), "top");
/// assert_eq!(request.header("host"), Some("localhost"));
/// assert_eq!(request.cookie("theme"), Some("dark"));
/// ```
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: String,
    pub(crate) fragment: String,
    pub(crate) version: String,
    pub(crate) headers: Headers,
    pub(crate) cookies: HashMap<String, String>,
    pub(crate) body: Bytes,
    pub(crate) raw_header: Option<String>,
    params: HashMap<String, String>,
    json: OnceCell<Value>,
}

impl Request {
    pub(crate) fn new(method: Method, path: String, version: String) -> Self {
        Self {
            method,
            path,
            query: String::new(),
            fragment: String::new(),
            version,
            headers: Headers::new(),
            cookies: HashMap::new(),
            body: Bytes::new(),
            raw_header: None,
            params: HashMap::new(),
            json: OnceCell::new(),
        }
    }

    /// Parses one complete request held entirely in `raw`, with default
    /// [`Limits`].
    ///
    /// # Errors
    ///
    /// Any [`RequestError`] the pipeline reports; truncated input reports
    /// [`RequestError::Closed`].
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        parser::parse_complete(raw, &Limits::default())
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the decoded request path without a trailing `/` (except for `/`
    /// itself). `*` for a server-wide `OPTIONS` request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the query string without the leading `?`; empty if absent.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Looks up one `key=value` pair of the query string.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then_some(v)
        })
    }

    /// Returns the fragment without the leading `#`; empty if absent.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Returns the version token of the request line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the request headers, including chunked trailers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns one header value (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the declared content type, or [`UNKNOWN_CONTENT_TYPE`].
    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or(UNKNOWN_CONTENT_TYPE)
    }

    /// Returns a path parameter captured by the matched route template.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns all captured path parameters.
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Returns a cookie value sent in the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns all cookies sent in the `Cookie` header.
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Returns the (de-chunked) body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body parsed as JSON. Parsed on first access and cached.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidJsonBody`] if the body is not a JSON document. The
    /// failure is not cached; every call reports it again.
    pub fn json(&self) -> Result<&Value, InvalidJsonBody> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let value = serde_json::from_slice(&self.body).map_err(|e| InvalidJsonBody {
            reason: e.to_string(),
        })?;
        Ok(self.json.get_or_init(|| value))
    }

    /// Returns the raw request line and header lines, CRLF-terminated.
    ///
    /// Only captured for `TRACE` requests, which echo it back.
    pub fn raw_header(&self) -> Option<&str> {
        self.raw_header.as_deref()
    }

    /// Returns `false` if the client asked to close the connection after
    /// this exchange. Connections are persistent by default.
    pub fn is_persistent(&self) -> bool {
        !self
            .headers
            .get("Connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }
}
