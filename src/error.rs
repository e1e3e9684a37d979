/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise self-update and rollback error types so every
    component reports failures with the same taxonomy and exit
    semantics.

  Security / Safety Notes:
    Error contexts carry versions and high-level paths only;
    registry responses are truncated before being surfaced.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across the feed client, rollback manager, and update
    manager; consumed by the binary entry point for exit codes.

  Revision History:
    2026-10-18 COD  Derived update/rollback taxonomy from core.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Syn-Syu-Update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Enumerates error domains surfaced by the update subsystem.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Release not found: {0}")]
    NotFound(String),
    #[error("Release registry: {0}")]
    Upstream(String),
    #[error("No releases found between {from} and {to}")]
    NoReleasesFound { from: String, to: String },
    #[error("Backup failed: {0}")]
    BackupFailed(String),
    #[error("Install of {version} failed: {reason}")]
    InstallFailed { version: String, reason: String },
    #[error("Installed version {installed} does not match target {expected}")]
    VerificationMismatch { expected: String, installed: String },
    #[error("Extraction of {archive} failed: {reason}")]
    ExtractionFailed { archive: String, reason: String },
    #[error("No rollback points available")]
    NoRollbackPoints,
    #[error("No rollback point recorded for version {0}")]
    VersionNotFound(String),
    #[error("Cannot roll back {requested} updates: only {available} rollback points available")]
    InsufficientRollbackPoints { requested: usize, available: usize },
    #[error("{}", health_failure_message(*reverted, critical))]
    HealthCheckFailed {
        reverted: bool,
        critical: Vec<String>,
    },
    #[error("Another update is already in progress (lock held at {0})")]
    LockUnavailable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn health_failure_message(reverted: bool, critical: &[String]) -> String {
    let outcome = if reverted {
        "update failed health validation and was reverted"
    } else {
        "update failed health validation and no rollback point was available"
    };
    if critical.is_empty() {
        outcome.to_string()
    } else {
        format!("{outcome}: {}", critical.join("; "))
    }
}

impl UpdateError {
    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            UpdateError::CommandMissing { .. } => ExitCode::from(10),
            UpdateError::CommandFailure { .. } => ExitCode::from(11),
            UpdateError::Config(_) => ExitCode::from(20),
            UpdateError::InvalidInput(_) => ExitCode::from(21),
            UpdateError::Upstream(_) => ExitCode::from(30),
            UpdateError::Serialization(_) => ExitCode::from(31),
            UpdateError::NotFound(_) => ExitCode::from(32),
            UpdateError::NoReleasesFound { .. } => ExitCode::from(33),
            UpdateError::Filesystem(_) => ExitCode::from(40),
            UpdateError::Io(_) => ExitCode::from(41),
            UpdateError::LockUnavailable(_) => ExitCode::from(42),
            UpdateError::Runtime(_) => ExitCode::from(50),
            UpdateError::BackupFailed(_) => ExitCode::from(60),
            UpdateError::InstallFailed { .. } => ExitCode::from(61),
            UpdateError::VerificationMismatch { .. } => ExitCode::from(62),
            UpdateError::HealthCheckFailed { .. } => ExitCode::from(63),
            UpdateError::NoRollbackPoints => ExitCode::from(70),
            UpdateError::VersionNotFound(_) => ExitCode::from(71),
            UpdateError::InsufficientRollbackPoints { .. } => ExitCode::from(72),
            UpdateError::ExtractionFailed { .. } => ExitCode::from(73),
        }
    }
}
