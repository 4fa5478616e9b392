//! Server configuration.
//!
//! [`ServerConfig`] is what the dispatcher is constructed from. Every field has
//! a default, so an embedding application can start from
//! `ServerConfig::default()` and adjust with the `with_*` setters, while the
//! binary reads the same structure from a TOML file:
//!
//! ```toml
//! document_root = "/srv/www"
//! server_name = "httprib/0.1"
//! access_log = "logs/access.log"   # or "stdout"; omit to disable
//!
//! [mime_types]
//! wasm = "application/wasm"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::static_files::default_mime_types;

/// Errors produced while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to open access log {path}: {source}")]
    AccessLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where completed requests are logged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessLogTarget {
    #[default]
    Disabled,
    Stdout,
    File(PathBuf),
}

// Serialized as a plain string: "stdout", "" (disabled) or a file path.
impl Serialize for AccessLogTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AccessLogTarget::Disabled => serializer.serialize_str(""),
            AccessLogTarget::Stdout => serializer.serialize_str("stdout"),
            AccessLogTarget::File(path) => path.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AccessLogTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            None | Some("") => AccessLogTarget::Disabled,
            Some("stdout") | Some("-") => AccessLogTarget::Stdout,
            Some(path) => AccessLogTarget::File(PathBuf::from(path)),
        })
    }
}

/// Configuration consumed by [`Dispatcher::new`](crate::dispatch::Dispatcher::new).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base directory for static-file fallback.
    pub document_root: PathBuf,

    /// File served for paths ending in `/`.
    pub default_document: String,

    /// Value of the `Server` header.
    pub server_name: String,

    /// Extension (without the dot) → content type.
    pub mime_types: HashMap<String, String>,

    pub access_log: AccessLogTarget,

    /// Upper bound for bodies buffered before a handler runs.
    pub max_body_bytes: usize,

    /// How long the connection waits for each piece of a request body.
    pub body_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("."),
            default_document: "index.html".to_owned(),
            server_name: "httprib".to_owned(),
            mime_types: default_mime_types(),
            access_log: AccessLogTarget::Disabled,
            max_body_bytes: 8 * 1024 * 1024,
            body_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Loads a TOML configuration file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    #[must_use]
    pub fn with_document_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.document_root = root.into();
        self
    }

    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    #[must_use]
    pub fn with_mime_types(mut self, mime_types: HashMap<String, String>) -> Self {
        self.mime_types = mime_types;
        self
    }

    #[must_use]
    pub fn with_access_log(mut self, target: AccessLogTarget) -> Self {
        self.access_log = target;
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.body_timeout_secs)
    }
}
