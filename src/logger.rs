/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::logger
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Provide structured, append-only logging for update,
    backup, and rollback transactions.

  Security / Safety Notes:
    Messages carry versions and archive paths only; registry
    payloads are never logged verbatim.

  Dependencies:
    std::fs::File, std::sync::Mutex, sha2 for integrity hashing.

  Operational Scope:
    Shared by every component through `Arc<Logger>`; emits
    RFC-3339 UTC stamped entries and seals each session log
    with a SHA-256 digest.

  Revision History:
    2026-10-18 COD  Adapted core logger for update sessions.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only logging with UTC timestamps
    - Deterministic formatting for auditability
    - Graceful error propagation on I/O failures
============================================================*/

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Result, UpdateError};

/// Structured log level for update events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Session logger that emits append-only entries in Synavera format.
pub struct Logger {
    file: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
    verbose: bool,
    echo: bool,
    warnings: AtomicUsize,
}

impl Logger {
    /// Build a logger that writes to stderr and optionally to a file.
    pub fn new(path: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let file = match path.as_deref() {
            Some(file_path) => Some(Mutex::new(BufWriter::new(open_log_file(file_path)?))),
            None => None,
        };

        Ok(Self {
            file,
            path,
            verbose,
            echo: true,
            warnings: AtomicUsize::new(0),
        })
    }

    /// Logger that records nothing and never echoes; used when the
    /// subsystem is embedded without a session log.
    pub fn silent() -> Self {
        Self {
            file: None,
            path: None,
            verbose: false,
            echo: false,
            warnings: AtomicUsize::new(0),
        }
    }

    /// Emit a log entry with the given level, code, and message.
    pub fn log<S: AsRef<str>>(&self, level: LogLevel, code: &str, message: S) {
        if level == LogLevel::Warn || level == LogLevel::Error {
            self.warnings.fetch_add(1, Ordering::Relaxed);
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = format!(
            "{timestamp} [{}] [{}] {}",
            level.as_str(),
            code,
            message.as_ref()
        );

        if self.echo && (self.verbose || level == LogLevel::Error || level == LogLevel::Warn) {
            eprintln!("{payload}");
        }

        let Some(file) = &self.file else {
            return;
        };
        if let Ok(mut guard) = file.lock() {
            if writeln!(guard, "{payload}").is_err() || guard.flush().is_err() {
                eprintln!(
                    "{timestamp} [{}] [LOGGER] Failed to write update log",
                    LogLevel::Error.as_str()
                );
            }
        }
    }

    /// Convenience wrapper for `INFO` level events.
    pub fn info<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Info, code, message);
    }

    /// Convenience wrapper for `WARN` level events.
    pub fn warn<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Warn, code, message);
    }

    /// Convenience wrapper for `ERROR` level events.
    pub fn error<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Error, code, message);
    }

    /// Convenience wrapper for `DEBUG` level events.
    pub fn debug<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Debug, code, message);
    }

    /// Number of WARN/ERROR entries emitted this session.
    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Return the path backing this logger, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Seal the session log by writing its SHA-256 digest to `<log>.hash`.
    pub fn finalize(&self) -> Result<()> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        if let Some(file) = &self.file {
            if let Ok(mut guard) = file.lock() {
                guard.flush()?;
            }
        }

        let data = std::fs::read(path).map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to read log for hashing {}: {err}",
                path.display()
            ))
        })?;
        let digest = Sha256::digest(&data);

        let mut hash_os = path.as_os_str().to_os_string();
        hash_os.push(".hash");
        let hash_path = PathBuf::from(hash_os);
        let mut file = File::create(&hash_path).map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to create hash file {}: {err}",
                hash_path.display()
            ))
        })?;
        writeln!(
            file,
            "{:x}  {}",
            digest,
            path.file_name().unwrap_or_default().to_string_lossy()
        )
        .map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to write hash file {}: {err}",
                hash_path.display()
            ))
        })?;
        Ok(())
    }
}

fn open_log_file(file_path: &Path) -> Result<File> {
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to create log directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)
        .map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to open log file {}: {err}",
                file_path.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_writes_digest_beside_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("logs").join("update_test.log");
        let logger = Logger::new(Some(log_path.clone()), false).expect("logger");
        logger.info("INIT", "session start");
        logger.warn("BACKUP", "backup skipped");
        logger.finalize().expect("finalize");

        let contents = std::fs::read_to_string(&log_path).expect("log");
        assert!(contents.contains("[INFO] [INIT] session start"));
        assert!(contents.contains("[WARN] [BACKUP] backup skipped"));

        let hash = std::fs::read_to_string(dir.path().join("logs").join("update_test.log.hash"))
            .expect("hash");
        assert!(hash.trim_end().ends_with("update_test.log"));
        assert_eq!(hash.split_whitespace().next().map(str::len), Some(64));
        assert_eq!(logger.warning_count(), 1);
    }

    #[test]
    fn silent_logger_counts_warnings_without_file() {
        let logger = Logger::silent();
        logger.error("X", "boom");
        logger.debug("X", "detail");
        assert_eq!(logger.warning_count(), 1);
        assert!(logger.path().is_none());
        logger.finalize().expect("no-op finalize");
    }
}
