//! HTTP/1.1 response builder.
//!
//! Handlers mutate a [`Response`] through `&mut` setters and commit it with
//! [`mark_ready`](Response::mark_ready); the connection loop then serializes
//! it into a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{Headers, Method, Request, StatusCode, UnknownStatusCode};

/// Content type assumed for bodies that were set without one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Body of a structured `400 Bad Request` rejection.
#[derive(Debug, Serialize)]
struct Rejection<'a> {
    message: &'a str,
    location: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<&'a str>,
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use coweb::http::{Response, StatusCode};
///
/// let mut response = Response::new(StatusCode::Ok);
/// response
///     .set_header("X-Request-Id", "abc-123")
///     .set_body(r#"{"status":"ok"}"#, "application/json")
///     .mark_ready();
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    ready: bool,
    persistent: bool,
    omit_body: bool,
    echo_keep_alive: bool,
}

impl Response {
    /// Creates a new persistent response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            ready: false,
            persistent: true,
            omit_body: false,
            echo_keep_alive: false,
        }
    }

    /// Creates the `200 OK` response answering `request`.
    ///
    /// Inherits the request's persistence decision, and suppresses the body on
    /// the wire for `HEAD`.
    pub fn for_request(request: &Request) -> Self {
        let mut response = Self::new(StatusCode::Ok);
        response.omit_body = request.method() == Method::Head;
        response.persistent = request.is_persistent();
        response.echo_keep_alive = request
            .header("Connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("keep-alive"));
        response
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Sets the status from its numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStatusCode`] for codes outside the status table; the
    /// status is left unchanged.
    pub fn set_status_code(&mut self, code: u16) -> Result<&mut Self, UnknownStatusCode> {
        self.status = StatusCode::try_from(code)?;
        Ok(self)
    }

    /// Sets a header, replacing any value it already had.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Adds a header entry next to any existing ones of the same name.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body together with its content type.
    pub fn set_body(&mut self, body: impl Into<Bytes>, content_type: &str) -> &mut Self {
        self.body = body.into();
        self.headers.set("Content-Type", content_type);
        self
    }

    pub fn set_html(&mut self, html: impl Into<String>) -> &mut Self {
        self.set_body(html.into(), DEFAULT_CONTENT_TYPE)
    }

    /// Serializes `value` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be represented as JSON.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> serde_json::Result<&mut Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.set_body(body, "application/json"))
    }

    /// Commits a `400 Bad Request` with a `{message, location, param}` JSON
    /// body, where `location` names where the offending input was found
    /// (`path`, `body`, ...).
    pub fn reject(&mut self, message: &str, location: &str, param: Option<&str>) -> &mut Self {
        let rejection = Rejection {
            message,
            location,
            param,
        };
        self.status = StatusCode::BadRequest;
        // A struct of string slices always serializes.
        let body = serde_json::to_vec(&rejection).unwrap_or_default();
        self.set_body(body, "application/json");
        self.mark_ready()
    }

    /// Marks the response as committed; remaining callbacks are skipped.
    pub fn mark_ready(&mut self) -> &mut Self {
        self.ready = true;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Closes the connection once this response has been sent.
    pub fn close_connection(&mut self) -> &mut Self {
        self.persistent = false;
        self
    }

    /// Returns `true` if the connection stays open after this response.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/html; charset=utf-8` if the body is non-empty and
    ///   no `Content-Type` header was set.
    /// - `Content-Length: <n>` for every status that may carry a body, even
    ///   when the body itself is suppressed because the request was `HEAD`.
    /// - `Connection: close` for non-persistent responses, or
    ///   `Connection: keep-alive` if the client asked for it explicitly.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("Content-Type") {
            self.headers.insert("Content-Type", DEFAULT_CONTENT_TYPE);
        }

        if self.status.is_bodiless() {
            self.headers.remove("Content-Length");
        } else {
            self.headers.set("Content-Length", content_length.to_string());
        }

        if !self.persistent {
            self.headers.set("Connection", "close");
        } else if self.echo_keep_alive {
            self.headers.set("Connection", "keep-alive");
        }

        let send_body = !self.omit_body && !self.status.is_bodiless();
        let estimated_size = 128 + self.headers.len() * 64 + if send_body { content_length } else { 0 };
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        if send_body {
            buf.put(&self.body[..]);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
