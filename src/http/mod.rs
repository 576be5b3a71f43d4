//! HTTP/1.1 protocol types and the incremental request pipeline.
//!
//! This module provides the core HTTP primitives:
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`], and [`Response`],
//! plus [`parser::fetch_request`], which reads one request off a
//! [`Transport`](crate::net::Transport).

use std::fmt;

use thiserror::Error;

pub mod headers;
pub mod parser;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use parser::{Limits, RequestError, fetch_request};
pub use request::{InvalidJsonBody, Request};
pub use response::Response;

/// Carriage return + line feed.
pub const CRLF: &[u8] = b"\r\n";

/// Blank line terminating a header block.
pub const CRLF2: &[u8] = b"\r\n\r\n";

macro_rules! status_codes {
    ($( $(#[$doc:meta])* ($code:literal, $name:ident, $reason:literal); )+) => {
        /// An HTTP response status code.
        ///
        /// # Examples
        ///
        /// ```
        /// use coweb::http::StatusCode;
        ///
        /// let status = StatusCode::Ok;
        /// assert_eq!(status.as_u16(), 200);
        /// assert_eq!(status.canonical_reason(), "OK");
        /// assert_eq!(StatusCode::try_from(418).unwrap(), StatusCode::ImATeapot);
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $( $(#[$doc])* $name = $code, )+
        }

        impl StatusCode {
            /// Returns the canonical reason phrase for this status code.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $( Self::$name => $reason, )+
                }
            }
        }

        impl TryFrom<u16> for StatusCode {
            type Error = UnknownStatusCode;

            fn try_from(code: u16) -> Result<Self, Self::Error> {
                match code {
                    $( $code => Ok(Self::$name), )+
                    other => Err(UnknownStatusCode(other)),
                }
            }
        }
    };
}

status_codes! {
    // 1xx Informational
    (100, Continue, "Continue");
    (101, SwitchingProtocols, "Switching Protocols");

    // 2xx Success
    (200, Ok, "OK");
    (201, Created, "Created");
    (202, Accepted, "Accepted");
    (203, NonAuthoritativeInformation, "Non-Authoritative Information");
    (204, NoContent, "No Content");
    (205, ResetContent, "Reset Content");
    (206, PartialContent, "Partial Content");

    // 3xx Redirection
    (300, MultipleChoices, "Multiple Choices");
    (301, MovedPermanently, "Moved Permanently");
    (302, Found, "Found");
    (303, SeeOther, "See Other");
    (304, NotModified, "Not Modified");
    (305, UseProxy, "Use Proxy");
    (307, TemporaryRedirect, "Temporary Redirect");

    // 4xx Client Error
    (400, BadRequest, "Bad Request");
    (401, Unauthorized, "Unauthorized");
    (402, PaymentRequired, "Payment Required");
    (403, Forbidden, "Forbidden");
    (404, NotFound, "Not Found");
    (405, MethodNotAllowed, "Method Not Allowed");
    (406, NotAcceptable, "Not Acceptable");
    (407, ProxyAuthenticationRequired, "Proxy Authentication Required");
    (408, RequestTimeout, "Request Timeout");
    (409, Conflict, "Conflict");
    (410, Gone, "Gone");
    (411, LengthRequired, "Length Required");
    (412, PreconditionFailed, "Precondition Failed");
    (413, PayloadTooLarge, "Payload Too Large");
    (414, UriTooLong, "URI Too Long");
    (415, UnsupportedMediaType, "Unsupported Media Type");
    (416, RangeNotSatisfiable, "Range Not Satisfiable");
    (417, ExpectationFailed, "Expectation Failed");
    /// Also used to refuse static paths that try to escape their directory.
    (418, ImATeapot, "I'm a teapot");

    // 5xx Server Error
    (500, InternalServerError, "Internal Server Error");
    (501, NotImplemented, "Not Implemented");
    (502, BadGateway, "Bad Gateway");
    (503, ServiceUnavailable, "Service Unavailable");
    (504, GatewayTimeout, "Gateway Timeout");
    (505, HttpVersionNotSupported, "HTTP Version Not Supported");
}

/// A numeric code missing from the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown HTTP status code {0}")]
pub struct UnknownStatusCode(pub u16);

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns `true` for responses that never carry a body (1xx, 204, 304).
    pub fn is_bodiless(self) -> bool {
        matches!(self.as_u16(), 100..=199 | 204 | 304)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Only the methods the server understands are representable; any other
/// token in a request line makes the request malformed.
///
/// # Examples
///
/// ```
/// use coweb::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// assert!("PATCH".parse::<Method>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
}

impl Method {
    /// Methods a route can be bound to, in the order OPTIONS lists them.
    pub const ROUTABLE: [Method; 5] = [Self::Get, Self::Head, Self::Post, Self::Put, Self::Delete];

    /// Returns the method as a string slice.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }

    /// Returns `true` for methods whose requests carry no body worth reading.
    pub fn skips_body(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method token outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported HTTP method `{0}`")]
pub struct UnknownMethod(pub String);

impl std::str::FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            other => return Err(UnknownMethod(other.to_owned())),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
