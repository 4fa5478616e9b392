//! Static-file fallback: maps URL paths onto a document root.
//!
//! Resolution is purely lexical: the decoded URL path is appended to the
//! document root component by component, and a trailing `/` selects the
//! default document (`index.html` unless configured otherwise). Components
//! that would climb out of the root (`..`, absolute or drive prefixes) make the
//! path unresolvable, which the dispatcher treats like a missing file.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs::File;

/// Content type used when an extension is not in the table.
pub const FALLBACK_CONTENT_TYPE: &str = "text/plain";

/// Joins `url_path` onto `root`, appending `default_document` for directory
/// paths. Returns `None` when the path would leave `root`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use httprib::static_files::resolve;
///
/// let root = Path::new("/srv/www");
/// assert_eq!(resolve(root, "/css/site.css", "index.html").unwrap(), root.join("css/site.css"));
/// assert_eq!(resolve(root, "/docs/", "index.html").unwrap(), root.join("docs/index.html"));
/// assert!(resolve(root, "/../etc/passwd", "index.html").is_none());
/// ```
pub fn resolve(root: &Path, url_path: &str, default_document: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(url_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if url_path.is_empty() || url_path.ends_with('/') {
        resolved.push(default_document);
    }
    Some(resolved)
}

/// Extension → content-type table used when none is configured.
pub fn default_mime_types() -> HashMap<String, String> {
    [
        ("css", "text/css"),
        ("gif", "image/gif"),
        ("html", "text/html"),
        ("htm", "text/html"),
        ("ico", "image/vnd.microsoft.icon"),
        ("jpeg", "image/jpeg"),
        ("jpg", "image/jpeg"),
        ("json", "application/json"),
        ("js", "application/javascript"),
        ("log", "text/plain"),
        ("png", "image/png"),
        ("svg", "image/svg+xml"),
        ("txt", "text/plain"),
        ("webp", "image/webp"),
        ("xml", "application/xml"),
    ]
    .into_iter()
    .map(|(ext, mime)| (ext.to_owned(), mime.to_owned()))
    .collect()
}

/// A document root plus the lookup rules for files under it.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    default_document: String,
    mime_types: HashMap<String, String>,
}

impl StaticFiles {
    pub fn new(
        root: impl Into<PathBuf>,
        default_document: impl Into<String>,
        mime_types: HashMap<String, String>,
    ) -> Self {
        Self {
            root: root.into(),
            default_document: default_document.into(),
            mime_types,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// See [`resolve`].
    pub fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        resolve(&self.root, url_path, &self.default_document)
    }

    /// Returns `true` if a regular file exists at `path`. Directories and
    /// other non-files do not count.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.is_file())
    }

    /// Content type for `path` by extension (case-insensitive).
    pub fn content_type(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| {
                self.mime_types
                    .get(ext)
                    .or_else(|| self.mime_types.get(&ext.to_ascii_lowercase()))
            })
            .map_or(FALLBACK_CONTENT_TYPE, String::as_str)
    }

    /// Opens `path` for streaming.
    ///
    /// Returns `Ok(None)` when the path vanished or is not a regular file
    /// (for instance a directory, or a file replaced between the existence
    /// check and this call).
    pub async fn open(&self, path: &Path) -> io::Result<Option<(File, u64)>> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some((file, metadata.len())))
    }
}
