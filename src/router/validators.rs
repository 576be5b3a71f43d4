//! Reusable validator callbacks.
//!
//! Each validator checks one input and, on failure, commits a `400 Bad Request`
//! with a `{message, location, param}` JSON body, which stops the rest of the
//! chain. Place them ahead of the terminal handler:
//!
//! ```
//! use coweb::router::{Router, callback, validators};
//!
//! let mut router = Router::new();
//! router
//!     .post("/users", [
//!         validators::body_no_whitespace("/login"),
//!         validators::body_email("/email"),
//!         callback(|_req, res| {
//!             res.set_status(coweb::http::StatusCode::Created);
//!             Ok(())
//!         }),
//!     ])
//!     .unwrap();
//! ```
//!
//! Body fields are addressed with JSON pointers (`/user/email`); a bare name
//! such as `email` is read as `/email`.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::{Callback, callback};

/// `location` reported for path parameter rejections.
pub const LOCATION_PATH: &str = "path";
/// `location` reported for body field rejections.
pub const LOCATION_BODY: &str = "body";

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| anchored(r"(\w+)(\.|_)?(\w*)@(\w+)(\.(\w+))+").expect("email pattern compiles"));
static NO_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| anchored(r"\w+").expect("word pattern compiles"));
static NON_EMPTY: LazyLock<Regex> =
    LazyLock::new(|| anchored(r"(?s).+").expect("non-empty pattern compiles"));

// The whole value must match, not a substring of it.
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn pointer(param: &str) -> String {
    if param.is_empty() || param.starts_with('/') {
        param.to_owned()
    } else {
        format!("/{param}")
    }
}

/// JSON value kinds checked by [`body_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Boolean,
    /// Any number.
    Number,
    /// A number without a fractional part.
    Integer,
    String,
    Array,
    Object,
}

impl JsonType {
    /// Returns `true` if `value` is of this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Name used in rejection messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejects requests whose path parameter `param` is not an integer.
pub fn path_param_int(param: &str) -> Callback {
    let param = param.to_owned();
    callback(move |req, res| {
        let valid = req
            .path_param(&param)
            .is_some_and(|value| value.parse::<i64>().is_ok());
        if !valid {
            let message = format!("Argument {param} should be integer");
            res.reject(&message, LOCATION_PATH, Some(&param));
        }
        Ok(())
    })
}

/// Rejects requests whose JSON body lacks `param` or holds a value of another
/// kind there.
///
/// A body that is not JSON at all surfaces as
/// [`HandlerError::InvalidJson`](super::HandlerError::InvalidJson).
pub fn body_type(param: &str, expected: JsonType) -> Callback {
    let param = pointer(param);
    callback(move |req, res| {
        match req.json()?.pointer(&param) {
            None => {
                let message = format!("Body element {param} is required");
                res.reject(&message, LOCATION_BODY, Some(&param));
            }
            Some(value) if !expected.matches(value) => {
                let message = format!("Body element {param} must be {expected}");
                res.reject(&message, LOCATION_BODY, Some(&param));
            }
            Some(_) => {}
        }
        Ok(())
    })
}

/// Shorthand for `body_type(param, JsonType::String)`.
pub fn body_string(param: &str) -> Callback {
    body_type(param, JsonType::String)
}

/// Rejects requests whose JSON body field `param` is missing, is not a string,
/// or does not match `pattern` in its entirety.
///
/// `pattern_name` describes the pattern in the rejection message
/// (`Argument /code must be {pattern_name}`).
///
/// # Errors
///
/// Returns the regex compilation error if `pattern` is invalid.
pub fn body_matches(param: &str, pattern: &str, pattern_name: &str) -> Result<Callback, regex::Error> {
    Ok(string_matching(param, anchored(pattern)?, pattern_name))
}

/// Requires `param` to be an email address.
pub fn body_email(param: &str) -> Callback {
    string_matching(param, EMAIL.clone(), "email")
}

/// Requires `param` to be a non-empty string.
pub fn body_non_empty(param: &str) -> Callback {
    string_matching(param, NON_EMPTY.clone(), "non empty string")
}

/// Requires `param` to be a non-empty string of word characters only.
pub fn body_no_whitespace(param: &str) -> Callback {
    string_matching(param, NO_WHITESPACE.clone(), "non empty string with no whitespaces")
}

fn string_matching(param: &str, regex: Regex, pattern_name: &str) -> Callback {
    let param = pointer(param);
    let pattern_name: Arc<str> = Arc::from(pattern_name);
    callback(move |req, res| {
        match req.json()?.pointer(&param) {
            None => {
                let message = format!("Body element {param} is required");
                res.reject(&message, LOCATION_BODY, Some(&param));
            }
            Some(Value::String(text)) => {
                if !regex.is_match(text) {
                    let message = format!("Argument {param} must be {pattern_name}");
                    res.reject(&message, LOCATION_BODY, Some(&param));
                }
            }
            Some(_) => {
                let message = format!("Body element {param} must be string");
                res.reject(&message, LOCATION_BODY, Some(&param));
            }
        }
        Ok(())
    })
}
