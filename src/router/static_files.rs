//! Static file and directory bindings.
//!
//! Content is read into memory when the binding is made; requests never touch
//! the filesystem. Every served file needs an extension from the MIME table
//! below, so a typo in an asset name fails at startup instead of at request
//! time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::{HandlerError, RouteError, Router, callback};
use crate::http::StatusCode;

/// Name of the greedy parameter a directory binding captures.
pub const STATIC_PATH_PARAM: &str = "static_path";

const INDEX_FILE: &str = "index.html";

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("js", "text/javascript"),
    ("css", "text/css"),
    ("ico", "image/x-icon"),
    ("json", "application/json"),
    ("map", "application/octet-stream"),
    ("txt", "text/plain"),
];

/// Looks up the content type served for `path` by its extension.
///
/// ```
/// use std::path::Path;
/// use coweb::router::static_files::content_type_for;
///
/// assert_eq!(content_type_for(Path::new("app/main.js")), Some("text/javascript"));
/// assert_eq!(content_type_for(Path::new("README")), None);
/// ```
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?;
    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == extension)
        .map(|&(_, content_type)| content_type)
}

#[derive(Debug, Clone)]
struct StaticFile {
    content: Bytes,
    content_type: &'static str,
}

impl StaticFile {
    fn load(path: &Path) -> Result<Self, RouteError> {
        let content_type = content_type_for(path).ok_or_else(|| RouteError::UnknownExtension {
            path: path.to_path_buf(),
        })?;
        let content = fs::read(path).map_err(|source| RouteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            content: Bytes::from(content),
            content_type,
        })
    }
}

impl Router {
    /// Serves the file at `file_path` for `GET` (and `HEAD`) requests to the
    /// literal path `template`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::NotAFile`] if `file_path` is not a regular file.
    /// - [`RouteError::UnknownExtension`] if its extension has no known
    ///   content type.
    /// - [`RouteError::Io`] if it cannot be read.
    pub fn bind_static_file(
        &mut self,
        template: &str,
        file_path: impl AsRef<Path>,
    ) -> Result<&mut Self, RouteError> {
        let file_path = file_path.as_ref();
        if !file_path.is_file() {
            return Err(RouteError::NotAFile {
                path: file_path.to_path_buf(),
            });
        }
        let file = StaticFile::load(file_path)?;
        debug!(path = %file_path.display(), bytes = file.content.len(), "static file loaded");

        self.get(
            template,
            [callback(move |_req, res| {
                res.set_body(file.content.clone(), file.content_type);
                Ok(())
            })],
        )
    }

    /// Serves every file below `base_dir` under `prefix`.
    ///
    /// `GET /prefix/css/site.css` answers with `base_dir/css/site.css`; a bare
    /// `GET /prefix` answers with `base_dir/index.html`. Paths containing `..`
    /// are refused with `418 I'm a teapot`; paths that name no indexed file
    /// fall through to the default callback.
    ///
    /// # Errors
    ///
    /// - [`RouteError::NotADirectory`] if `base_dir` is not a directory.
    /// - [`RouteError::UnknownExtension`] if any file below it has no known
    ///   content type.
    /// - [`RouteError::Io`] if the tree cannot be walked or read.
    pub fn bind_static_directory(
        &mut self,
        prefix: &str,
        base_dir: impl AsRef<Path>,
    ) -> Result<&mut Self, RouteError> {
        let base_dir = base_dir.as_ref();
        if !base_dir.is_dir() {
            return Err(RouteError::NotADirectory {
                path: base_dir.to_path_buf(),
            });
        }

        let mut files = HashMap::new();
        index_directory(base_dir, String::new(), &mut files)?;
        debug!(dir = %base_dir.display(), files = files.len(), "static directory indexed");
        let files = Arc::new(files);

        let template = format!("{}/<{STATIC_PATH_PARAM}>", prefix.trim_end_matches('/'));
        self.get(
            &template,
            [callback(move |req, res| {
                let remainder = req.path_param(STATIC_PATH_PARAM).unwrap_or_default();
                if remainder.contains("..") {
                    res.set_status(StatusCode::ImATeapot).mark_ready();
                    return Ok(());
                }
                let key = if remainder.is_empty() { INDEX_FILE } else { remainder };
                let file = files.get(key).ok_or(HandlerError::NoMatch)?;
                res.set_body(file.content.clone(), file.content_type);
                Ok(())
            })],
        )
    }
}

fn index_directory(
    dir: &Path,
    relative: String,
    files: &mut HashMap<String, StaticFile>,
) -> Result<(), RouteError> {
    let io_error = |path: &Path| {
        let path: PathBuf = path.to_path_buf();
        move |source: std::io::Error| RouteError::Io { path, source }
    };

    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if relative.is_empty() {
            name
        } else {
            format!("{relative}/{name}")
        };

        let file_type = entry.file_type().map_err(io_error(&path))?;
        if file_type.is_dir() {
            index_directory(&path, key, files)?;
        } else if path.is_file() {
            files.insert(key, StaticFile::load(&path)?);
        }
    }
    Ok(())
}
