/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::history
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Durable, append-only JSON logs for rollback points and
    update outcomes, written crash-safely.

  Security / Safety Notes:
    Documents are replaced via write-temp-then-rename inside
    the same directory, so readers observe either the old or
    the new document, never a torn write.

  Dependencies:
    serde_json for documents, tempfile for atomic replacement,
    chrono for record timestamps.

  Operational Scope:
    Owned by the rollback manager (rollback ledger) and the
    update manager (update history).

  Revision History:
    2026-10-18 COD  Replaced manifest writer with journal store.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only records, never mutated in place
    - Bounded retention with oldest-first truncation
============================================================*/

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, UpdateError};

/// Retention for the update history log.
pub const UPDATE_HISTORY_CAP: usize = 50;

/// Audit record for one update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHistory {
    pub timestamp: DateTime<Utc>,
    pub from_version: String,
    pub to_version: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// JSON array document holding records of type `T`, oldest first.
#[derive(Debug, Clone)]
pub struct JsonLog<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record; an absent or blank file is an empty log.
    pub fn load(&self) -> Result<Vec<T>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(UpdateError::Filesystem(format!(
                    "Failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|err| {
            UpdateError::Serialization(format!("Corrupt log {}: {err}", self.path.display()))
        })
    }

    /// Replace the whole document atomically.
    pub fn store(&self, records: &[T]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to create log directory {}: {err}",
                parent.display()
            ))
        })?;

        let payload = serde_json::to_vec_pretty(records).map_err(|err| {
            UpdateError::Serialization(format!("Failed to encode {}: {err}", self.path.display()))
        })?;
        let mut temp = NamedTempFile::new_in(parent).map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to create temp file in {}: {err}",
                parent.display()
            ))
        })?;
        temp.write_all(&payload)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| {
            UpdateError::Filesystem(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                err.error
            ))
        })?;
        Ok(())
    }

    /// Append `record`, dropping the oldest entries beyond `cap`.
    pub fn append(&self, record: T, cap: Option<usize>) -> Result<Vec<T>> {
        let mut records = self.load()?;
        records.push(record);
        if let Some(cap) = cap {
            if records.len() > cap {
                let excess = records.len() - cap;
                records.drain(..excess);
            }
        }
        self.store(&records)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> UpdateHistory {
        UpdateHistory {
            timestamp: Utc::now(),
            from_version: format!("1.0.{n}"),
            to_version: format!("1.0.{}", n + 1),
            success: n % 2 == 0,
            error_message: (n % 2 == 1).then(|| "install failed".to_string()),
        }
    }

    #[test]
    fn missing_and_blank_files_are_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log: JsonLog<UpdateHistory> = JsonLog::new(dir.path().join("update-history.json"));
        assert!(log.load().expect("missing").is_empty());

        std::fs::write(log.path(), "  \n").expect("blank");
        assert!(log.load().expect("blank").is_empty());
    }

    #[test]
    fn append_truncates_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonLog::new(dir.path().join("nested").join("update-history.json"));
        for n in 0..(UPDATE_HISTORY_CAP + 3) {
            log.append(entry(n), Some(UPDATE_HISTORY_CAP)).expect("append");
        }
        let records = log.load().expect("load");
        assert_eq!(records.len(), UPDATE_HISTORY_CAP);
        assert_eq!(records[0].from_version, "1.0.3");
        assert_eq!(
            records.last().map(|r| r.from_version.as_str()),
            Some("1.0.52")
        );
    }

    #[test]
    fn records_use_camel_case_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonLog::new(dir.path().join("update-history.json"));
        log.append(entry(1), None).expect("append");
        let raw = std::fs::read_to_string(log.path()).expect("read");
        assert!(raw.contains("\"fromVersion\""));
        assert!(raw.contains("\"errorMessage\": \"install failed\""));
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log: JsonLog<UpdateHistory> = JsonLog::new(dir.path().join("update-history.json"));
        std::fs::write(log.path(), "{not json").expect("write");
        assert!(matches!(log.load(), Err(UpdateError::Serialization(_))));
    }
}
