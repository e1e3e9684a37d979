/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::health
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Post-update health validation: required directories, a
    working binary, and the optional configuration file.

  Security / Safety Notes:
    Read-only filesystem probes plus one `--version` call.

  Dependencies:
    crate::process for the version query.

  Operational Scope:
    Invoked by the rollback manager after updates and on
    operator request.

  Revision History:
    2026-10-18 COD  Authored health scoring.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Blocking and advisory findings kept distinct
    - Score is informative; only critical findings fail
============================================================*/

use std::path::PathBuf;

use serde::Serialize;

use crate::error::UpdateError;
use crate::process::PackageManager;

const CRITICAL_PENALTY: u8 = 30;
const WARNING_PENALTY: u8 = 10;

/// Result of a health validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub passed: bool,
    pub score: u8,
    pub critical: Vec<String>,
    pub warnings: Vec<String>,
}

impl HealthCheckResult {
    fn from_findings(critical: Vec<String>, warnings: Vec<String>) -> Self {
        let penalty = critical.len() * CRITICAL_PENALTY as usize
            + warnings.len() * WARNING_PENALTY as usize;
        let score = 100usize.saturating_sub(penalty) as u8;
        Self {
            passed: critical.is_empty(),
            score,
            critical,
            warnings,
        }
    }
}

/// What a healthy installation looks like.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub required_dirs: Vec<PathBuf>,
    pub config_file: Option<PathBuf>,
}

/// Validate the installation against `policy`.
pub async fn check_installation(
    policy: &HealthPolicy,
    package_manager: &PackageManager,
) -> HealthCheckResult {
    let mut critical = Vec::new();
    let mut warnings = Vec::new();

    let missing_dirs: Vec<&PathBuf> = policy
        .required_dirs
        .iter()
        .filter(|dir| !dir.is_dir())
        .collect();
    for dir in &missing_dirs {
        critical.push(format!("Required directory missing: {}", dir.display()));
    }

    match package_manager.installed_version().await {
        Ok(_) => {}
        Err(UpdateError::CommandMissing { command }) if missing_dirs.is_empty() => {
            warnings.push(format!(
                "Binary `{command}` not found in PATH; installation directories are intact"
            ));
        }
        Err(err) => critical.push(format!("Version check failed: {err}")),
    }

    if let Some(config) = &policy.config_file {
        if !config.is_file() {
            warnings.push(format!("Configuration file missing: {}", config.display()));
        }
    }

    HealthCheckResult::from_findings(critical, warnings)
}
