//! Incremental HTTP/1.1 request pipeline.
//!
//! [`fetch_request`] reads one request off a [`Transport`], growing a
//! per-connection receive buffer until the header block, and then the body,
//! are complete. Bytes received past the end of the request stay in the
//! buffer for the next cycle.
//!
//! The line-level grammar lives in small pure functions
//! ([`parse_request_line`], [`parse_target`], [`parse_header_lines`],
//! [`parse_cookies`]) so it can be tested without a transport.

use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

use bytes::{Buf, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};

use super::request::{Request, UNKNOWN_CONTENT_TYPE};
use super::{CRLF, CRLF2, Headers, Method, StatusCode};
use crate::net::{SocketError, Transport};

/// Interim response sent before reading a body the client is holding back.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Size limits enforced while reading a request, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum length of the header block (request line and headers), and of
    /// a chunked body's trailer block.
    pub max_header_length: usize,
    /// Maximum length of a decoded body.
    pub max_body_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_length: 1_000_000,
            max_body_length: 1_000_000,
        }
    }
}

/// Why no request could be produced.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The peer went away before a full request arrived.
    #[error("connection closed")]
    Closed,

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("header block too large")]
    HeaderTooLarge,

    #[error("request body too large")]
    BodyTooLarge,
}

impl RequestError {
    /// Status the connection answers with before closing, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Closed => None,
            Self::Malformed(_) => Some(StatusCode::BadRequest),
            Self::HeaderTooLarge | Self::BodyTooLarge => Some(StatusCode::PayloadTooLarge),
        }
    }
}

impl From<SocketError> for RequestError {
    fn from(_: SocketError) -> Self {
        Self::Closed
    }
}

/// Reads the next request from `transport`.
///
/// `buffer` holds bytes already received on this connection and keeps any
/// surplus after the request.
///
/// # Errors
///
/// - [`RequestError::Closed`] if the peer disconnects first.
/// - [`RequestError::HeaderTooLarge`] if no header terminator appears within
///   `limits.max_header_length` bytes.
/// - [`RequestError::BodyTooLarge`] if the declared or decoded body exceeds
///   `limits.max_body_length`.
/// - [`RequestError::Malformed`] for any grammar violation.
pub async fn fetch_request<T>(
    transport: &T,
    buffer: &mut BytesMut,
    limits: &Limits,
) -> Result<Request, RequestError>
where
    T: Transport,
{
    let header_end = read_until(transport, buffer, CRLF2, limits.max_header_length)
        .await?
        .ok_or(RequestError::HeaderTooLarge)?;
    let block = buffer.split_to(header_end + CRLF2.len());
    let head = std::str::from_utf8(&block[..header_end])
        .map_err(|_| RequestError::Malformed("header block is not UTF-8"))?;
    trace!(bytes = header_end, "header block received");

    let mut lines = head.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines.next().ok_or(RequestError::Malformed("empty request line"))?;
    let mut request = parse_request_line(request_line)?;
    parse_header_lines(lines, &mut request.headers)?;

    if request.method == Method::Trace {
        request.raw_header = Some(format!("{head}\r\n"));
    }

    if !request.method.skips_body() {
        request.body = fetch_body(transport, buffer, &mut request.headers, limits).await?;
    }

    if !request.headers.contains("Content-Type") {
        request.headers.insert("Content-Type", UNKNOWN_CONTENT_TYPE);
    }
    if let Some(cookie) = request.headers.get("Cookie") {
        request.cookies = parse_cookies(cookie);
    }

    debug!(method = %request.method, path = %request.path, body = request.body.len(), "request parsed");
    Ok(request)
}

/// Parses a request held entirely in memory.
pub(crate) fn parse_complete(raw: &[u8], limits: &Limits) -> Result<Request, RequestError> {
    let transport = InMemory {
        remaining: std::cell::Cell::new(Some(Bytes::copy_from_slice(raw))),
    };
    let mut buffer = BytesMut::new();
    let mut fetch = pin!(fetch_request(&transport, &mut buffer, limits));
    match fetch.as_mut().poll(&mut Context::from_waker(Waker::noop())) {
        Poll::Ready(result) => result,
        // `InMemory` never suspends, so this is unreachable in practice.
        Poll::Pending => Err(RequestError::Closed),
    }
}

// Delivers one fixed buffer, then reports the connection as closed.
struct InMemory {
    remaining: std::cell::Cell<Option<Bytes>>,
}

impl Transport for InMemory {
    async fn receive(&self) -> Result<Bytes, SocketError> {
        self.remaining
            .take()
            .filter(|bytes| !bytes.is_empty())
            .ok_or(SocketError::Closed)
    }

    async fn send(&self, bytes: &[u8]) -> Result<usize, SocketError> {
        Ok(bytes.len())
    }
}

async fn receive_into<T: Transport>(
    transport: &T,
    buffer: &mut BytesMut,
) -> Result<(), RequestError> {
    let chunk = transport.receive().await?;
    buffer.extend_from_slice(&chunk);
    Ok(())
}

// Receives until `buffer` holds at least `len` bytes.
async fn fill<T: Transport>(
    transport: &T,
    buffer: &mut BytesMut,
    len: usize,
) -> Result<(), RequestError> {
    while buffer.len() < len {
        receive_into(transport, buffer).await?;
    }
    Ok(())
}

// Position of `needle` in `buffer`, receiving more as needed. `None` once the
// needle cannot appear within the first `max` bytes.
async fn read_until<T: Transport>(
    transport: &T,
    buffer: &mut BytesMut,
    needle: &[u8],
    max: usize,
) -> Result<Option<usize>, RequestError> {
    let mut from = 0;
    loop {
        if let Some(offset) = find(&buffer[from..], needle) {
            let position = from + offset;
            return Ok((position <= max).then_some(position));
        }
        if buffer.len() > max {
            return Ok(None);
        }
        from = buffer.len().saturating_sub(needle.len() - 1);
        receive_into(transport, buffer).await?;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

async fn fetch_body<T: Transport>(
    transport: &T,
    buffer: &mut BytesMut,
    headers: &mut Headers,
    limits: &Limits,
) -> Result<Bytes, RequestError> {
    if headers.contains("Expect") {
        if content_length(headers)?.is_some_and(|len| len > limits.max_body_length) {
            debug!("declared body exceeds limit, not reading it");
            return Err(RequestError::BodyTooLarge);
        }
        // A client that already started sending the body is not waiting.
        if buffer.is_empty() {
            transport.send(CONTINUE).await?;
        }
    }

    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|encoding| !encoding.eq_ignore_ascii_case("identity"));
    if chunked {
        return fetch_chunked(transport, buffer, headers, limits).await;
    }

    match content_length(headers)? {
        Some(len) if len > limits.max_body_length => Err(RequestError::BodyTooLarge),
        Some(len) => {
            fill(transport, buffer, len).await?;
            Ok(buffer.split_to(len).freeze())
        }
        None => Ok(Bytes::new()),
    }
}

fn content_length(headers: &Headers) -> Result<Option<usize>, RequestError> {
    headers
        .get("Content-Length")
        .map(|value| {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RequestError::Malformed("invalid Content-Length"));
            }
            value
                .parse()
                .map_err(|_| RequestError::Malformed("invalid Content-Length"))
        })
        .transpose()
}

async fn fetch_chunked<T: Transport>(
    transport: &T,
    buffer: &mut BytesMut,
    headers: &mut Headers,
    limits: &Limits,
) -> Result<Bytes, RequestError> {
    let mut body = BytesMut::new();
    loop {
        let size = loop {
            match httparse::parse_chunk_size(buffer) {
                Ok(httparse::Status::Complete((consumed, size))) => {
                    buffer.advance(consumed);
                    break size;
                }
                Ok(httparse::Status::Partial) if buffer.len() > limits.max_header_length => {
                    return Err(RequestError::Malformed("chunk size line too long"));
                }
                Ok(httparse::Status::Partial) => receive_into(transport, buffer).await?,
                Err(_) => return Err(RequestError::Malformed("invalid chunk size")),
            }
        };
        if size == 0 {
            break;
        }

        let size = usize::try_from(size).map_err(|_| RequestError::BodyTooLarge)?;
        if body.len().saturating_add(size) > limits.max_body_length {
            return Err(RequestError::BodyTooLarge);
        }
        fill(transport, buffer, size + CRLF.len()).await?;
        if &buffer[size..size + CRLF.len()] != CRLF {
            return Err(RequestError::Malformed("chunk data not followed by CRLF"));
        }
        body.extend_from_slice(&buffer[..size]);
        buffer.advance(size + CRLF.len());
        trace!(size, total = body.len(), "chunk received");
    }

    // Trailers, then the blank line ending the message.
    fill(transport, buffer, CRLF.len()).await?;
    if buffer.starts_with(CRLF) {
        buffer.advance(CRLF.len());
    } else {
        let end = read_until(transport, buffer, CRLF2, limits.max_header_length)
            .await?
            .ok_or(RequestError::HeaderTooLarge)?;
        let block = buffer.split_to(end + CRLF2.len());
        let trailer = std::str::from_utf8(&block[..end])
            .map_err(|_| RequestError::Malformed("trailer block is not UTF-8"))?;
        parse_header_lines(trailer.split("\r\n"), headers)?;
    }
    Ok(body.freeze())
}

/// Parses `METHOD SP target SP version` into a bare [`Request`].
///
/// # Errors
///
/// [`RequestError::Malformed`] if the line does not have exactly three
/// single-space separated tokens, the method is unsupported, or the target
/// does not decode.
pub fn parse_request_line(line: &str) -> Result<Request, RequestError> {
    let mut tokens = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(RequestError::Malformed("request line is not three tokens"));
    };
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(RequestError::Malformed("request line is not three tokens"));
    }

    let method: Method = method
        .parse()
        .map_err(|_| RequestError::Malformed("unsupported method"))?;
    let target = parse_target(method, target)?;

    let mut request = Request::new(method, target.path, version.to_owned());
    request.query = target.query;
    request.fragment = target.fragment;
    Ok(request)
}

/// Components of a decoded request target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub path: String,
    pub query: String,
    pub fragment: String,
}

/// Decodes and splits a request target as
/// `(scheme://authority)? path (?query)? (#fragment)?`.
///
/// The path loses a trailing `/` unless it is the root. An `OPTIONS *`
/// target is kept verbatim.
///
/// # Errors
///
/// [`RequestError::Malformed`] for broken percent escapes, non-UTF-8 results,
/// or a target with no absolute path.
pub fn parse_target(method: Method, raw: &str) -> Result<Target, RequestError> {
    if method == Method::Options && raw == "*" {
        return Ok(Target {
            path: raw.to_owned(),
            ..Target::default()
        });
    }

    let decoded = percent_decode(raw)?;
    let rest = if decoded.starts_with('/') {
        decoded.as_str()
    } else {
        let (_, after_scheme) = decoded
            .split_once("://")
            .ok_or(RequestError::Malformed("target is neither a path nor an absolute URI"))?;
        let slash = after_scheme
            .find('/')
            .ok_or(RequestError::Malformed("absolute URI without a path"))?;
        &after_scheme[slash..]
    };

    let (before_fragment, fragment) = rest.split_once('#').unwrap_or((rest, ""));
    let (path, query) = before_fragment.split_once('?').unwrap_or((before_fragment, ""));
    let path = match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    };

    Ok(Target {
        path: path.to_owned(),
        query: query.to_owned(),
        fragment: fragment.to_owned(),
    })
}

fn percent_decode(raw: &str) -> Result<String, RequestError> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes
                .get(i + 1..i + 3)
                .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or(RequestError::Malformed("invalid percent escape"))?;
            decoded.push(escape);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).map_err(|_| RequestError::Malformed("target is not UTF-8"))
}

/// Folds header lines into `headers`.
///
/// A line starting with a space or tab continues the previous header. A
/// repeated name accumulates onto the first entry. Afterwards every value has
/// runs of CR, LF and TAB collapsed into one space and is trimmed.
///
/// # Errors
///
/// [`RequestError::Malformed`] for a line with no colon, or a continuation
/// with no header before it.
pub fn parse_header_lines<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    headers: &mut Headers,
) -> Result<(), RequestError> {
    let mut last: Option<&str> = None;
    for line in lines.into_iter().filter(|line| !line.is_empty()) {
        if line.starts_with([' ', '\t']) {
            let name = last.ok_or(RequestError::Malformed("continuation line without a header"))?;
            headers.append(name, line);
        } else if let Some((name, value)) = line.split_once(':') {
            headers.append(name, value).push(' ');
            last = Some(name);
        } else {
            return Err(RequestError::Malformed("header line without a colon"));
        }
    }
    for value in headers.values_mut() {
        *value = collapse_whitespace(value);
    }
    Ok(())
}

fn collapse_whitespace(value: &str) -> String {
    let mut collapsed = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if matches!(c, '\r' | '\n' | '\t') {
            if !in_run {
                collapsed.push(' ');
            }
            in_run = true;
        } else {
            collapsed.push(c);
            in_run = false;
        }
    }
    collapsed.trim_matches(' ').to_owned()
}

/// Extracts `name=value` pairs from a `Cookie` header.
///
/// Pairs are separated by `;` or by `, `; a comma not followed by a space
/// belongs to the value. Pairs whose name is empty or not a cookie token are
/// skipped.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let mut start = 0;
    let bytes = header.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let separator = b == b';' || (b == b',' && bytes.get(i + 1) == Some(&b' '));
        if separator {
            insert_cookie(&mut cookies, &header[start..i]);
            start = i + 1;
        }
    }
    insert_cookie(&mut cookies, &header[start..]);
    cookies
}

fn insert_cookie(cookies: &mut HashMap<String, String>, pair: &str) {
    let Some((name, value)) = pair.split_once('=') else {
        return;
    };
    let name = name.trim_start();
    if name.is_empty() || !name.bytes().all(is_cookie_token) {
        trace!(pair, "skipping unparseable cookie");
        return;
    }
    cookies.insert(name.to_owned(), value.trim().to_owned());
}

fn is_cookie_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%^&*'~-._+`|".contains(&b)
}
