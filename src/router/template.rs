//! Path templates with named captures.
//!
//! | Template                        | Example match       | Captured params            |
//! |---------------------------------|---------------------|----------------------------|
//! | `/users`                        | `/users`            | *(none)*                   |
//! | `/users/{userId}/notes/{id}`    | `/users/42/notes/7` | `userId → 42`, `id → 7`    |
//! | `/files/<rest>`                 | `/files/a/b/c`      | `rest → a/b/c`             |
//!
//! `{name}` captures exactly one path segment (possibly empty). `<name>` is
//! greedy: it captures the rest of the path, slashes included, and must be
//! the last segment. A greedy template also matches its bare prefix
//! (`/files`), capturing an empty string.
//!
//! Templates get a leading `/` if they lack one and lose a trailing `/`,
//! mirroring how request paths are normalized by the parser.

use std::collections::HashMap;
use std::fmt;

use super::RouteError;

/// Path parameters captured by a successful match.
pub type PathParams = HashMap<String, String>;

// A single template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
    Greedy(String),
}

/// A compiled path template.
///
/// # Examples
///
/// ```
/// use coweb::router::RouteTemplate;
///
/// let template = RouteTemplate::parse("/users/{userId}/notes/{noteId}").unwrap();
/// let params = template.matches("/users/42/notes/7").unwrap();
/// assert_eq!(params["userId"], "42");
/// assert_eq!(params["noteId"], "7");
/// assert!(template.matches("/users/42/notes").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl RouteTemplate {
    /// Compiles `template`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTemplate`] when a capture does not span a
    /// whole segment, has an empty name, or a greedy capture is not last.
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidTemplate {
            template: template.to_owned(),
            reason,
        };

        let trimmed = template.trim_start_matches('/');
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let mut segments = Vec::new();
        if !trimmed.is_empty() {
            for raw in trimmed.split('/') {
                if matches!(segments.last(), Some(Segment::Greedy(_))) {
                    return Err(invalid("greedy capture must be the last segment"));
                }
                segments.push(Self::segment(raw).ok_or_else(|| {
                    invalid("captures must span a whole segment and have a name")
                })?);
            }
        }

        Ok(Self {
            source: format!("/{trimmed}"),
            segments,
        })
    }

    fn segment(raw: &str) -> Option<Segment> {
        let capture = |open: char, close: char| {
            raw.strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
                .filter(|name| !name.is_empty() && !name.contains(['{', '}', '<', '>']))
        };
        if let Some(name) = capture('{', '}') {
            return Some(Segment::Capture(name.to_owned()));
        }
        if let Some(name) = capture('<', '>') {
            return Some(Segment::Greedy(name.to_owned()));
        }
        if raw.contains(['{', '}', '<', '>']) {
            return None;
        }
        Some(Segment::Literal(raw.to_owned()))
    }

    /// Names of the captures, in template order.
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Literal(_) => None,
            Segment::Capture(name) | Segment::Greedy(name) => Some(name.as_str()),
        })
    }

    /// Matches a normalized request path, returning the captures on success.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        let mut params = PathParams::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    params.insert(name.clone(), (*parts.get(i)?).to_owned());
                }
                Segment::Greedy(name) => {
                    let remainder = parts.get(i..).map(|tail| tail.join("/")).unwrap_or_default();
                    params.insert(name.clone(), remainder);
                    return Some(params);
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
