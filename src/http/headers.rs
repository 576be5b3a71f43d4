//! Ordered header multimap.
//!
//! Names compare case-insensitively; the first-seen spelling of a name is the
//! one kept and emitted.

/// Header entries in the order they were added.
///
/// Requests fold repeated headers into one entry with [`append`](Self::append);
/// responses may carry several entries (e.g. `Set-Cookie`) via
/// [`insert`](Self::insert).
///
/// # Examples
///
/// ```
/// use coweb::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Set-Cookie", "session=1");
/// headers.insert("set-cookie", "theme=dark");
/// assert_eq!(headers.get_all("Set-Cookie").count(), 2);
///
/// headers.set("SET-COOKIE", "session=2");
/// assert_eq!(headers.get("set-cookie"), Some("session=2"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry after any existing ones of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces the value of the first entry named `name` in place and drops
    /// any further entries with that name; appends if there is none.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut value = Some(value.into());
        self.inner.retain_mut(|(k, v)| {
            if !k.eq_ignore_ascii_case(&name) {
                return true;
            }
            match value.take() {
                Some(new) => {
                    *v = new;
                    true
                }
                None => false,
            }
        });
        if let Some(value) = value {
            self.inner.push((name, value));
        }
    }

    /// Appends `value` to the existing entry named `name`, or creates it.
    ///
    /// Returns the accumulated value.
    pub fn append(&mut self, name: &str, value: &str) -> &mut String {
        let index = match self.position(name) {
            Some(index) => {
                self.inner[index].1.push_str(value);
                index
            }
            None => {
                self.inner.push((name.to_owned(), value.to_owned()));
                self.inner.len() - 1
            }
        };
        &mut self.inner[index].1
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        self.inner
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Every value stored under `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drops every entry named `name`, reporting whether there was one.
    pub fn remove(&mut self, name: &str) -> bool {
        let count = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() != count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of entries, counting repeats.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Mutable iterator over every value, in insertion order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.inner.iter_mut().map(|(_, v)| v)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.inner.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_case() {
        let mut h = Headers::new();
        h.insert("Content-Length", "12");
        h.insert("Connection", "close");
        for name in ["content-length", "CONTENT-LENGTH", "Content-Length"] {
            assert_eq!(h.get(name), Some("12"));
        }
        assert!(h.contains("CONNECTION"));
        assert!(!h.contains("Transfer-Encoding"));
    }

    #[test]
    fn insert_keeps_repeats() {
        let mut h = Headers::new();
        h.insert("Set-Cookie", "session=1");
        h.insert("Vary", "Origin");
        h.insert("set-cookie", "theme=dark");
        assert_eq!(h.get_all("SET-COOKIE").collect::<Vec<_>>(), vec!["session=1", "theme=dark"]);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut h = Headers::new();
        h.insert("Date", "today");
        h.insert("Content-Type", "text/plain");
        h.insert("Server", "coweb");
        h.insert("content-type", "text/css");
        h.set("CONTENT-TYPE", "application/json");
        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(
            pairs,
            vec![("Date", "today"), ("Content-Type", "application/json"), ("Server", "coweb")]
        );

        h.set("Allow", "GET");
        assert_eq!(h.get("allow"), Some("GET"));
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn append_keeps_first_spelling() {
        let mut h = Headers::new();
        h.append("Accept", "text/html ");
        h.append("ACCEPT", "application/json ");
        assert_eq!(h.len(), 1);
        assert_eq!(h.iter().next(), Some(("Accept", "text/html application/json ")));
    }

    #[test]
    fn remove_drops_every_entry() {
        let mut h = Headers::new();
        h.insert("Content-Length", "3");
        h.insert("content-length", "4");
        assert!(h.remove("CONTENT-LENGTH"));
        assert!(h.is_empty());
        assert!(!h.remove("content-length"));
    }
}
