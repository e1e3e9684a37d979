/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::rollback
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Create, prune, and restore point-in-time backups of the
    installation, and gate updates on post-update health.

  Security / Safety Notes:
    Archives live under the subsystem home; extraction writes
    over the configured install directory only. Emergency
    rollback never touches the package manager.

  Dependencies:
    crate::process for tar and package manager invocations,
    crate::history for the rollback ledger, chrono for stamps.

  Operational Scope:
    Owns `rollback-history.json` and the `backups/` archives.
    Used by the update manager and directly by operators.

  Revision History:
    2026-10-18 COD  Authored rollback manager.
  ------------------------------------------------------------
  SSE Principles Observed:
    - No partial records on failed backups
    - Bounded retention, oldest evicted first
    - Restore failures reported, not thrown, for escalation
============================================================*/

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::health::{check_installation, HealthCheckResult, HealthPolicy};
use crate::history::JsonLog;
use crate::lock::UpdateLock;
use crate::logger::Logger;
use crate::process::{Archiver, CommandRunner, PackageManager};
use crate::version::strip_tag_prefix;

pub(crate) const BACKUP_PREFIX: &str = "backup-";
pub(crate) const BACKUP_SUFFIX: &str = ".tar.gz";

/// Durable record of one installation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPoint {
    /// Version that was installed when the snapshot was taken.
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub backup_path: PathBuf,
    pub automatic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Manages rollback points and restores.
pub struct RollbackManager {
    backups_dir: PathBuf,
    install_dir: PathBuf,
    max_points: usize,
    ledger: JsonLog<RollbackPoint>,
    lock_path: PathBuf,
    archiver: Archiver,
    package_manager: PackageManager,
    health: HealthPolicy,
    logger: Arc<Logger>,
}

impl RollbackManager {
    pub fn new(config: &UpdaterConfig, runner: Arc<dyn CommandRunner>, logger: Arc<Logger>) -> Self {
        Self {
            backups_dir: config.backups_dir(),
            install_dir: config.install_dir.clone(),
            max_points: config.rollback.max_points.max(1),
            ledger: JsonLog::new(config.rollback_history_path()),
            lock_path: config.lock_path(),
            archiver: Archiver::new(runner.clone(), config.tools.archiver.clone()),
            package_manager: PackageManager::new(
                runner,
                config.tools.package_manager.clone(),
                config.package_name.clone(),
                config.binary_name.clone(),
            ),
            health: HealthPolicy {
                required_dirs: config.required_dirs(),
                config_file: config.rollback.config_file.clone(),
            },
            logger,
        }
    }

    /// Snapshot the installation before moving away from `version`.
    pub async fn create_rollback_point(
        &self,
        version: &str,
        reason: Option<&str>,
    ) -> Result<RollbackPoint> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        self.snapshot(version, reason).await
    }

    /// `create_rollback_point` for callers already holding the update lock.
    pub(crate) async fn snapshot(
        &self,
        version: &str,
        reason: Option<&str>,
    ) -> Result<RollbackPoint> {
        std::fs::create_dir_all(&self.backups_dir).map_err(|err| {
            UpdateError::BackupFailed(format!(
                "cannot create backup directory {}: {err}",
                self.backups_dir.display()
            ))
        })?;

        let version = strip_tag_prefix(version, "").to_string();
        let timestamp = Utc::now();
        let archive = self.archive_path(&version, timestamp);

        if let Err(err) = self.archiver.compress(&self.install_dir, &archive).await {
            discard_archive(&archive);
            self.logger.error(
                "BACKUP",
                format!("Snapshot of {} failed: {err}", self.install_dir.display()),
            );
            return Err(match err {
                UpdateError::BackupFailed(reason) => UpdateError::BackupFailed(reason),
                other => UpdateError::BackupFailed(other.to_string()),
            });
        }

        let point = RollbackPoint {
            version,
            timestamp,
            backup_path: archive.clone(),
            automatic: true,
            reason: reason.map(str::to_string),
        };

        let mut points = match self.ledger.load() {
            Ok(points) => points,
            Err(err) => {
                discard_archive(&archive);
                return Err(err);
            }
        };
        points.push(point.clone());
        while points.len() > self.max_points {
            let Some(oldest) = oldest_index(&points) else {
                break;
            };
            let evicted = points.remove(oldest);
            self.remove_archive(&evicted);
            self.logger.info(
                "EVICT",
                format!(
                    "Evicted rollback point {} from {}",
                    evicted.version,
                    evicted.timestamp.to_rfc3339()
                ),
            );
        }
        if let Err(err) = self.ledger.store(&points) {
            discard_archive(&archive);
            return Err(err);
        }

        self.logger.info(
            "BACKUP",
            format!(
                "Rollback point for {} written to {}",
                point.version,
                point.backup_path.display()
            ),
        );
        Ok(point)
    }

    /// Restore the most recent point and reinstall its version.
    pub async fn rollback_to_previous(&self) -> Result<bool> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        self.restore_latest().await
    }

    /// Restore the point recorded for exactly `version`.
    pub async fn rollback_to_version(&self, version: &str) -> Result<bool> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        let wanted = strip_tag_prefix(version, "");
        let points = self.list_rollback_points()?;
        let point = points
            .iter()
            .find(|point| point.version == wanted)
            .ok_or_else(|| UpdateError::VersionNotFound(wanted.to_string()))?;
        self.restore(point, true).await
    }

    /// Undo `steps` updates at once: restore the point `steps` back.
    pub async fn rollback_chain(&self, steps: usize) -> Result<bool> {
        if steps == 0 {
            return Err(UpdateError::InvalidInput(
                "rollback chain length must be at least 1".into(),
            ));
        }
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        let points = self.list_rollback_points()?;
        if points.len() < steps {
            return Err(UpdateError::InsufficientRollbackPoints {
                requested: steps,
                available: points.len(),
            });
        }
        self.restore(&points[steps - 1], true).await
    }

    /// Extract the most recent archive without health checks or reinstall.
    pub async fn emergency_rollback(&self) -> Result<bool> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        let points = self.list_rollback_points()?;
        let latest = points.first().ok_or(UpdateError::NoRollbackPoints)?;
        self.logger.warn(
            "EMERGENCY",
            format!(
                "Emergency restore of {} from {}",
                latest.version,
                latest.backup_path.display()
            ),
        );
        self.restore(latest, false).await
    }

    pub async fn validate_update_health(&self) -> HealthCheckResult {
        let result = check_installation(&self.health, &self.package_manager).await;
        for issue in &result.critical {
            self.logger.error("HEALTH", issue);
        }
        for issue in &result.warnings {
            self.logger.warn("HEALTH", issue);
        }
        self.logger.info(
            "HEALTH",
            format!("passed={} score={}", result.passed, result.score),
        );
        result
    }

    /// Run `update_fn` under the update lock, then validate health. A failed
    /// update or a failed health check restores the most recent rollback
    /// point before the error surfaces. `update_fn` must not take the lock
    /// itself; `UpdateManager::update_with_auto_rollback` wraps the manager's
    /// transaction this way.
    pub async fn auto_rollback_on_failure<T, F, Fut>(&self, update_fn: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        let value = match update_fn().await {
            Ok(value) => value,
            Err(err) => {
                self.revert_after_failure(&err).await;
                return Err(err);
            }
        };
        self.gate_on_health().await?;
        Ok(value)
    }

    /// Validate health after an install; an unhealthy result is reverted and
    /// reported as `HealthCheckFailed`. Caller holds the update lock.
    pub(crate) async fn gate_on_health(&self) -> Result<()> {
        let health = self.validate_update_health().await;
        if health.passed {
            return Ok(());
        }
        let reverted = self.restore_after_failure().await;
        Err(UpdateError::HealthCheckFailed {
            reverted,
            critical: health.critical,
        })
    }

    /// Revert after `err` ended an update. Lock contention means another
    /// process owns the installation, so nothing is touched.
    pub(crate) async fn revert_after_failure(&self, err: &UpdateError) -> bool {
        if matches!(err, UpdateError::LockUnavailable(_)) {
            self.logger
                .warn("ROLLBACK", format!("Not reverting: {err}"));
            return false;
        }
        self.logger
            .error("UPDATE", format!("Update failed, reverting: {err}"));
        self.restore_after_failure().await
    }

    /// Bytes used by every recorded archive.
    pub fn get_total_rollback_storage(&self) -> Result<u64> {
        Ok(self
            .list_rollback_points()?
            .iter()
            .map(|point| self.get_rollback_point_size(point))
            .sum())
    }

    /// Archive size on disk; a missing archive counts as zero.
    pub fn get_rollback_point_size(&self, point: &RollbackPoint) -> u64 {
        std::fs::metadata(&point.backup_path)
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    /// Every point, newest first.
    pub fn list_rollback_points(&self) -> Result<Vec<RollbackPoint>> {
        let mut indexed: Vec<(usize, RollbackPoint)> =
            self.ledger.load()?.into_iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        Ok(indexed.into_iter().map(|(_, point)| point).collect())
    }

    /// Keep only the newest `keep` points; returns how many were removed.
    pub fn cleanup_rollback_points(&self, keep: usize) -> Result<usize> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        let newest_first = self.list_rollback_points()?;
        if newest_first.len() <= keep {
            return Ok(0);
        }
        let (kept, dropped) = newest_first.split_at(keep);
        for point in dropped {
            self.remove_archive(point);
        }
        let mut remaining = kept.to_vec();
        remaining.reverse();
        self.ledger.store(&remaining)?;
        self.logger.info(
            "CLEANUP",
            format!("Removed {} rollback points, kept {}", dropped.len(), kept.len()),
        );
        Ok(dropped.len())
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub(crate) fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    async fn restore(&self, point: &RollbackPoint, reinstall: bool) -> Result<bool> {
        if let Err(err) = self
            .archiver
            .extract(&point.backup_path, &self.install_dir)
            .await
        {
            self.logger.error("RESTORE", err.to_string());
            return Ok(false);
        }
        self.logger.info(
            "RESTORE",
            format!(
                "Restored {} from {}",
                self.install_dir.display(),
                point.backup_path.display()
            ),
        );

        if reinstall {
            if let Err(err) = self.package_manager.install(&point.version).await {
                self.logger.error("REINSTALL", err.to_string());
                return Ok(false);
            }
            self.logger
                .info("REINSTALL", format!("Reinstalled {}", point.version));
        }
        Ok(true)
    }

    async fn restore_latest(&self) -> Result<bool> {
        let points = self.list_rollback_points()?;
        let latest = points.first().ok_or(UpdateError::NoRollbackPoints)?;
        self.restore(latest, true).await
    }

    async fn restore_after_failure(&self) -> bool {
        match self.restore_latest().await {
            Ok(true) => true,
            Ok(false) => {
                self.logger
                    .error("ROLLBACK", "Automatic rollback could not restore the backup");
                false
            }
            Err(UpdateError::NoRollbackPoints) => {
                self.logger
                    .warn("ROLLBACK", "No rollback point available; update left in place");
                false
            }
            Err(err) => {
                self.logger
                    .error("ROLLBACK", format!("Automatic rollback failed: {err}"));
                false
            }
        }
    }

    fn archive_path(&self, version: &str, timestamp: DateTime<Utc>) -> PathBuf {
        let stamp = timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let base = format!("{BACKUP_PREFIX}{version}-{stamp}");
        let mut candidate = self.backups_dir.join(format!("{base}{BACKUP_SUFFIX}"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.backups_dir.join(format!("{base}-{n}{BACKUP_SUFFIX}"));
            n += 1;
        }
        candidate
    }

    fn remove_archive(&self, point: &RollbackPoint) {
        match std::fs::remove_file(&point.backup_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => self.logger.warn(
                "EVICT",
                format!(
                    "Failed to delete {}: {err}",
                    point.backup_path.display()
                ),
            ),
        }
    }
}

/// Oldest point by timestamp; ties resolve to the earliest insertion.
fn oldest_index(points: &[RollbackPoint]) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| a.timestamp.cmp(&b.timestamp).then(ia.cmp(ib)))
        .map(|(index, _)| index)
}

fn discard_archive(archive: &Path) {
    let _ = std::fs::remove_file(archive);
}
