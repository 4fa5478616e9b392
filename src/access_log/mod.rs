//! Access log: one plain-text line per completed response.
//!
//! ```text
//! [2026-10-18T14:03:07.512]127.0.0.1 - 200 GET /api/query?id=123
//! ```
//!
//! Timestamps are local time with millisecond precision. Writes are best
//! effort: a failing sink is reported through `tracing` and never affects the
//! response.

use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Local};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::{AccessLogTarget, ConfigError};
use crate::http::{Method, StatusCode};

enum Sink {
    Disabled,
    Stdout(Mutex<tokio::io::Stdout>),
    File(Mutex<tokio::fs::File>),
}

/// Append-only access-log sink shared by all connections.
pub struct AccessLog {
    sink: Sink,
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.sink {
            Sink::Disabled => "disabled",
            Sink::Stdout(_) => "stdout",
            Sink::File(_) => "file",
        };
        f.debug_struct("AccessLog").field("sink", &kind).finish()
    }
}

/// The fields of one access-log line.
#[derive(Debug, Clone)]
pub struct AccessEntry<'a> {
    pub at: DateTime<Local>,
    pub remote: IpAddr,
    pub status: StatusCode,
    pub method: &'a Method,
    pub target: &'a str,
}

impl AccessEntry<'_> {
    pub fn format(&self) -> String {
        format!(
            "[{}]{} - {} {} {}",
            self.at.format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.remote,
            self.status.as_u16(),
            self.method,
            self.target
        )
    }
}

impl AccessLog {
    pub fn disabled() -> Self {
        Self {
            sink: Sink::Disabled,
        }
    }

    /// Opens the sink for `target`. File targets are opened for append and
    /// their parent directory is created if missing.
    pub fn open(target: &AccessLogTarget) -> Result<Self, ConfigError> {
        let sink = match target {
            AccessLogTarget::Disabled => Sink::Disabled,
            AccessLogTarget::Stdout => Sink::Stdout(Mutex::new(tokio::io::stdout())),
            AccessLogTarget::File(path) => Sink::File(Mutex::new(open_append(path)?)),
        };
        Ok(Self { sink })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.sink, Sink::Disabled)
    }

    /// Writes one line for `entry`.
    pub async fn record(&self, entry: &AccessEntry<'_>) {
        let written = match &self.sink {
            Sink::Disabled => return,
            Sink::Stdout(out) => write_line(&mut *out.lock().await, entry).await,
            Sink::File(file) => write_line(&mut *file.lock().await, entry).await,
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write access log");
        }
    }
}

async fn write_line<W>(out: &mut W, entry: &AccessEntry<'_>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = entry.format();
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}

fn open_append(path: &Path) -> Result<tokio::fs::File, ConfigError> {
    let access_log_error = |source| ConfigError::AccessLog {
        path: path.to_owned(),
        source,
    };
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(access_log_error)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(access_log_error)?;
    Ok(tokio::fs::File::from_std(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry<'a>(method: &'a Method, target: &'a str) -> AccessEntry<'a> {
        AccessEntry {
            at: Local.with_ymd_and_hms(2026, 10, 18, 9, 5, 7).unwrap(),
            remote: "10.0.0.7".parse().unwrap(),
            status: StatusCode::MethodNotAllowed,
            method,
            target,
        }
    }

    #[test]
    fn line_format() {
        let line = entry(&Method::Get, "/api/upload?x=1").format();
        assert_eq!(line, "[2026-10-18T09:05:07.000]10.0.0.7 - 405 GET /api/upload?x=1");
    }

    #[tokio::test]
    async fn file_sink_appends_lines() {
        let dir = crate::static_files::tests::scratch_dir("access");
        let path = dir.join("logs").join("access.log");
        let log = AccessLog::open(&AccessLogTarget::File(path.clone())).unwrap();
        assert!(log.is_enabled());

        log.record(&entry(&Method::Get, "/a")).await;
        log.record(&entry(&Method::Post, "/b")).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("405 GET /a"));
        assert!(lines[1].ends_with("405 POST /b"));
    }

    #[tokio::test]
    async fn stdout_sink_writes_without_blocking() {
        let log = AccessLog::open(&AccessLogTarget::Stdout).unwrap();
        assert!(log.is_enabled());
        log.record(&entry(&Method::Get, "/stdout")).await;
    }

    #[tokio::test]
    async fn disabled_sink_is_silent() {
        let log = AccessLog::open(&AccessLogTarget::Disabled).unwrap();
        assert!(!log.is_enabled());
        log.record(&entry(&Method::Get, "/")).await;
    }
}
