/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load and validate Syn-Syu-Update configuration: release
    feed coordinates, package identity, backup retention, and
    the external tools used to install and archive.

  Security / Safety Notes:
    Configuration is read from operator-controlled paths only;
    no secrets are expected or stored.

  Dependencies:
    toml and serde for parsing, dirs for platform directories.

  Operational Scope:
    Consumed by the binary entry point and by `UpdateManager`
    construction; every field carries a default.

  Revision History:
    2026-10-18 COD  Authored update configuration layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit defaults with validation at load time
    - Deterministic path derivation
============================================================*/

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, UpdateError};

const CONFIG_DIR_NAME: &str = "synsyu";
const CONFIG_FILE_NAME: &str = "update.toml";

/// Top-level configuration for the update subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Home of the subsystem's durable state (backups, histories, lock).
    pub home_dir: PathBuf,
    /// Package identifier passed to the package manager.
    pub package_name: String,
    /// Installed executable queried for its version.
    pub binary_name: String,
    /// Directory tree captured by backups and restored on rollback.
    pub install_dir: PathBuf,
    /// Snapshot the installation before applying an update.
    pub backup_before_update: bool,
    pub feed: FeedConfig,
    pub rollback: RollbackConfig,
    pub tools: ToolsConfig,
}

/// Release registry coordinates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub tag_prefix: String,
    /// Request timeout in seconds.
    pub timeout: u64,
    pub max_retries: usize,
    pub user_agent: String,
    pub include_prerelease: bool,
}

/// Retention and health policy for rollback points.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    pub max_points: usize,
    /// Directories that must exist after an update; defaults to `install_dir`.
    pub required_dirs: Vec<PathBuf>,
    /// Optional application configuration file checked during health validation.
    pub config_file: Option<PathBuf>,
}

/// External programs invoked by the subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub package_manager: String,
    pub archiver: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data = dirs::data_local_dir().unwrap_or_else(|| home.join(".local").join("share"));
        Self {
            home_dir: home.join(".synsyu"),
            package_name: "syn-syu".into(),
            binary_name: "syn-syu".into(),
            install_dir: data.join("syn-syu"),
            backup_before_update: true,
            feed: FeedConfig::default(),
            rollback: RollbackConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            owner: "Synavera-Discorporated".into(),
            repo: "Syn-Syu".into(),
            tag_prefix: "v".into(),
            timeout: 15,
            max_retries: 3,
            user_agent: "Syn-Syu-Update/0.11 (linux)".into(),
            include_prerelease: false,
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_points: 5,
            required_dirs: Vec::new(),
            config_file: dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.toml")),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            package_manager: "npm".into(),
            archiver: "tar".into(),
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from an explicit path, or from the default
    /// location when present, falling back to built-in defaults.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(explicit) => Self::load_from_path(explicit)?,
            None => match default_config_path() {
                Some(candidate) if candidate.is_file() => Self::load_from_path(&candidate)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            UpdateError::Config(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|err| UpdateError::Config(format!("{}: {err}", path.display())))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Reject settings that would make the subsystem unsafe to run.
    pub fn validate(&self) -> Result<()> {
        if self.package_name.trim().is_empty() {
            return Err(UpdateError::Config("package_name must not be empty".into()));
        }
        if self.binary_name.trim().is_empty() {
            return Err(UpdateError::Config("binary_name must not be empty".into()));
        }
        if self.rollback.max_points == 0 {
            return Err(UpdateError::Config(
                "rollback.max_points must be at least 1".into(),
            ));
        }
        if self.feed.owner.trim().is_empty() || self.feed.repo.trim().is_empty() {
            return Err(UpdateError::Config(
                "feed.owner and feed.repo must be set".into(),
            ));
        }
        Ok(())
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.home_dir.join("backups")
    }

    pub fn rollback_history_path(&self) -> PathBuf {
        self.home_dir.join("rollback-history.json")
    }

    pub fn update_history_path(&self) -> PathBuf {
        self.home_dir.join("update-history.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home_dir.join("update.lock")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    /// Directories the health check requires; the install directory when
    /// none are configured.
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        if self.rollback.required_dirs.is_empty() {
            vec![self.install_dir.clone()]
        } else {
            self.rollback.required_dirs.clone()
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
