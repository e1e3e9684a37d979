/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::updater
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Orchestrate the update transaction: check the feed, take a
    rollback point, install the target version, verify it, and
    record the outcome.

  Security / Safety Notes:
    The transaction runs under an exclusive advisory lock.
    Backup failures degrade the safety net but never block an
    update; history write failures never change the outcome.

  Dependencies:
    crate::feed, crate::rollback, crate::process, crate::history,
    crate::lock.

  Operational Scope:
    Caller-facing surface of the subsystem; consumed by the CLI
    and by embedding applications.

  Revision History:
    2026-10-18 COD  Authored update manager.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Strictly serial check → backup → install → verify
    - Every attempt recorded, best-effort
    - Independent restore path for crash recovery
============================================================*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;

use crate::config::UpdaterConfig;
use crate::diff::ReleaseDiffGenerator;
use crate::error::{Result, UpdateError};
use crate::feed::{ReleaseFeedClient, UpdateCheckResult};
use crate::health::HealthCheckResult;
use crate::history::{JsonLog, UpdateHistory, UPDATE_HISTORY_CAP};
use crate::lock::UpdateLock;
use crate::logger::Logger;
use crate::process::{CommandRunner, PackageManager, SystemRunner};
use crate::rollback::{RollbackManager, RollbackPoint, BACKUP_PREFIX, BACKUP_SUFFIX};
use crate::version::{strip_tag_prefix, versions_match};

/// Returned by `get_changelog` when no release can be resolved.
pub const CHANGELOG_UNAVAILABLE: &str = "Changelog unavailable";

/// How one pass through the transaction ended.
enum Attempt {
    AlreadyCurrent,
    Installed,
    Failed(UpdateError),
}

/// Top-level coordinator for updates and restores.
pub struct UpdateManager {
    feed: Arc<ReleaseFeedClient>,
    rollback: RollbackManager,
    package_manager: PackageManager,
    history: JsonLog<UpdateHistory>,
    lock_path: PathBuf,
    backup_before_update: bool,
    include_prerelease: bool,
    logger: Arc<Logger>,
}

impl UpdateManager {
    /// Wire the subsystem against the real registry and real subprocesses.
    pub fn new(config: &UpdaterConfig, logger: Arc<Logger>) -> Result<Self> {
        let feed = Arc::new(ReleaseFeedClient::new(&config.feed)?);
        Ok(Self::with_parts(config, feed, Arc::new(SystemRunner), logger))
    }

    pub fn with_parts(
        config: &UpdaterConfig,
        feed: Arc<ReleaseFeedClient>,
        runner: Arc<dyn CommandRunner>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            rollback: RollbackManager::new(config, runner.clone(), logger.clone()),
            package_manager: PackageManager::new(
                runner,
                config.tools.package_manager.clone(),
                config.package_name.clone(),
                config.binary_name.clone(),
            ),
            feed,
            history: JsonLog::new(config.update_history_path()),
            lock_path: config.lock_path(),
            backup_before_update: config.backup_before_update,
            include_prerelease: config.feed.include_prerelease,
            logger,
        }
    }

    pub fn feed(&self) -> &Arc<ReleaseFeedClient> {
        &self.feed
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn diff_generator(&self) -> ReleaseDiffGenerator {
        ReleaseDiffGenerator::new(self.feed.clone())
    }

    pub async fn check_for_updates(&self, current: &str) -> UpdateCheckResult {
        let result = self
            .feed
            .check_for_update(current, self.include_prerelease)
            .await;
        self.logger.info(
            "CHECK",
            format!(
                "current={} latest={} update={}",
                result.current_version, result.latest_version, result.has_update
            ),
        );
        result
    }

    /// Version reported by the installed binary.
    pub async fn installed_version(&self) -> Result<String> {
        self.package_manager.installed_version().await
    }

    /// Move the installation from `current` to `target`, or to the newest
    /// release when no target is given. Returns `true` when already
    /// current or when the update verified; `false` when any step after
    /// the check failed. Only lock contention and lock I/O are errors.
    pub async fn update(&self, current: &str, target: Option<&str>) -> Result<bool> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        Ok(!matches!(
            self.attempt(current, target).await,
            Attempt::Failed(_)
        ))
    }

    /// `update` with the health gate: under a single lock, a failed install
    /// or an unhealthy result restores the newest rollback point and the
    /// error surfaces. Nothing is validated when already current.
    pub async fn update_with_auto_rollback(
        &self,
        current: &str,
        target: Option<&str>,
    ) -> Result<bool> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        match self.attempt(current, target).await {
            Attempt::AlreadyCurrent => Ok(true),
            Attempt::Installed => {
                self.rollback.gate_on_health().await?;
                Ok(true)
            }
            Attempt::Failed(err) => {
                self.rollback.revert_after_failure(&err).await;
                Err(err)
            }
        }
    }

    /// One unlocked pass: check, back up, install, verify, record.
    async fn attempt(&self, current: &str, target: Option<&str>) -> Attempt {
        let current = strip_tag_prefix(current, self.feed.tag_prefix()).to_string();

        let target = match target {
            Some(explicit) => strip_tag_prefix(explicit, self.feed.tag_prefix()).to_string(),
            None => {
                let check = self.check_for_updates(&current).await;
                if !check.has_update {
                    self.logger
                        .info("CURRENT", format!("{current} is up to date"));
                    return Attempt::AlreadyCurrent;
                }
                check.latest_version
            }
        };
        self.logger
            .info("UPDATE", format!("Updating {current} → {target}"));

        if self.backup_before_update {
            let reason = format!("before update to {target}");
            if let Err(err) = self.rollback.snapshot(&current, Some(&reason)).await {
                self.logger.warn(
                    "BACKUP",
                    format!("Proceeding without rollback point: {err}"),
                );
            }
        }

        let outcome = self.install_and_verify(&target).await;
        self.record(&current, &target, outcome.as_ref().err());
        match outcome {
            Ok(()) => {
                self.logger
                    .info("UPDATE", format!("Installed and verified {target}"));
                Attempt::Installed
            }
            Err(err) => {
                self.logger.error("UPDATE", err.to_string());
                Attempt::Failed(err)
            }
        }
    }

    async fn install_and_verify(&self, target: &str) -> Result<()> {
        self.package_manager.install(target).await?;

        let installed = self
            .package_manager
            .installed_version()
            .await
            .map_err(|err| UpdateError::VerificationMismatch {
                expected: target.to_string(),
                installed: format!("unknown ({err})"),
            })?;
        if !versions_match(&installed, target) {
            return Err(UpdateError::VerificationMismatch {
                expected: target.to_string(),
                installed,
            });
        }
        Ok(())
    }

    fn record(&self, from: &str, to: &str, error: Option<&UpdateError>) {
        let entry = UpdateHistory {
            timestamp: Utc::now(),
            from_version: from.to_string(),
            to_version: to.to_string(),
            success: error.is_none(),
            error_message: error.map(ToString::to_string),
        };
        if let Err(err) = self.history.append(entry, Some(UPDATE_HISTORY_CAP)) {
            self.logger
                .warn("HISTORY", format!("Failed to record update outcome: {err}"));
        }
    }

    /// Restore `backup_file`, or the newest backup on disk by modification
    /// time. Independent of the rollback ledger so it works when the ledger
    /// is lost or corrupt. A relative `backup_file` names a file under the
    /// working directory when one exists there, else under `backups/`.
    pub async fn rollback(&self, backup_file: Option<&Path>) -> Result<bool> {
        let _lock = UpdateLock::acquire(&self.lock_path)?;
        let archive = match backup_file {
            Some(file) if file.is_absolute() || file.is_file() => file.to_path_buf(),
            Some(file) => self.rollback.backups_dir().join(file),
            None => match newest_backup(self.rollback.backups_dir()) {
                Some(path) => path,
                None => {
                    self.logger.warn("RESTORE", "No backups available");
                    return Ok(false);
                }
            },
        };
        if !archive.is_file() {
            self.logger
                .warn("RESTORE", format!("Backup {} not found", archive.display()));
            return Ok(false);
        }

        match self
            .rollback
            .archiver()
            .extract(&archive, self.rollback.install_dir())
            .await
        {
            Ok(()) => {
                self.logger
                    .info("RESTORE", format!("Restored from {}", archive.display()));
                Ok(true)
            }
            Err(err) => {
                self.logger.error("RESTORE", err.to_string());
                Ok(false)
            }
        }
    }

    pub async fn emergency_rollback(&self) -> Result<bool> {
        self.rollback.emergency_rollback().await
    }

    /// Recorded update attempts, oldest first; empty when unreadable.
    pub fn get_update_history(&self) -> Vec<UpdateHistory> {
        self.history.load().unwrap_or_else(|err| {
            self.logger
                .warn("HISTORY", format!("Update history unreadable: {err}"));
            Vec::new()
        })
    }

    /// Changelog for `version`, or for the latest release.
    pub async fn get_changelog(&self, version: Option<&str>) -> String {
        let release = match version {
            Some(version) => self.feed.get_release_by_version(version).await,
            None => self
                .feed
                .get_latest_release(self.include_prerelease)
                .await
                .ok(),
        };
        release
            .map(|release| release.changelog)
            .unwrap_or_else(|| CHANGELOG_UNAVAILABLE.to_string())
    }

    /// Backup archive names, newest first.
    pub fn list_backups(&self) -> Vec<String> {
        backup_files(self.rollback.backups_dir())
            .into_iter()
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .collect()
    }

    pub fn list_rollback_points(&self) -> Result<Vec<RollbackPoint>> {
        self.rollback.list_rollback_points()
    }

    pub async fn validate_update_health(&self) -> HealthCheckResult {
        self.rollback.validate_update_health().await
    }
}

fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
}

/// Backup archives under `dir`, newest modification first (name breaks ties).
fn backup_files(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_backup_name(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((entry.path(), modified))
        })
        .collect();
    files.sort_by(|(pa, ma), (pb, mb)| mb.cmp(ma).then_with(|| pb.cmp(pa)));
    files
}

fn newest_backup(dir: &Path) -> Option<PathBuf> {
    backup_files(dir).into_iter().next().map(|(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{
        quiet_logger, release_json, test_config, touch, FakeTools, RecordingRunner,
        ScriptedTransport,
    };

    struct Fixture {
        dir: tempfile::TempDir,
        config: UpdaterConfig,
        transport: Arc<ScriptedTransport>,
        tools: Arc<FakeTools>,
        runner: Arc<RecordingRunner>,
        manager: UpdateManager,
    }

    fn fixture(installed: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let transport = Arc::new(ScriptedTransport::new());
        transport.publish(&[
            release_json("v3.0.0", false, "## Features\n- feat: chains", "2026-03-01T00:00:00Z"),
            release_json("v2.5.0", false, "- fix: history", "2026-02-01T00:00:00Z"),
        ]);
        let feed = Arc::new(ReleaseFeedClient::with_transport(
            &config.feed,
            transport.clone(),
        ));
        let tools = FakeTools::installed(installed);
        let runner = Arc::new(RecordingRunner::with_tools(tools.clone()));
        let manager = UpdateManager::with_parts(&config, feed, runner.clone(), quiet_logger());
        Fixture {
            dir,
            config,
            transport,
            tools,
            runner,
            manager,
        }
    }

    #[tokio::test]
    async fn update_to_latest_records_success() {
        let fx = fixture("2.5.0");
        assert!(fx.manager.update("2.5.0", None).await.expect("update"));

        let points = fx.manager.list_rollback_points().expect("points");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].version, "2.5.0");
        assert_eq!(fx.runner.installs(), vec!["3.0.0"]);

        let history = fx.manager.get_update_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].from_version, "2.5.0");
        assert_eq!(history[0].to_version, "3.0.0");
        assert!(history[0].error_message.is_none());
    }

    #[tokio::test]
    async fn already_current_has_no_side_effects() {
        let fx = fixture("3.0.0");
        assert!(fx.manager.update("v3.0.0", None).await.expect("update"));
        assert!(fx.runner.calls().is_empty());
        assert!(fx.manager.get_update_history().is_empty());
        assert!(fx.manager.list_backups().is_empty());
    }

    #[tokio::test]
    async fn feed_outage_is_treated_as_current() {
        let fx = fixture("2.5.0");
        fx.transport.go_offline();
        assert!(fx.manager.update("2.5.0", None).await.expect("update"));
        assert!(fx.runner.installs().is_empty());
    }

    #[tokio::test]
    async fn explicit_target_ignores_feed() {
        let fx = fixture("3.0.0");
        fx.transport.go_offline();
        assert!(fx.manager.update("3.0.0", Some("v2.5.0")).await.expect("update"));
        assert_eq!(fx.runner.installs(), vec!["2.5.0"]);
        assert_eq!(fx.manager.get_update_history()[0].to_version, "2.5.0");
    }

    #[tokio::test]
    async fn version_mismatch_fails_and_is_recorded() {
        let fx = fixture("2.5.0");
        *fx.tools.reported_after_install.lock().expect("lock") = Some("2.9.9".into());

        assert!(!fx.manager.update("2.5.0", None).await.expect("no throw"));
        let history = fx.manager.get_update_history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        let message = history[0].error_message.clone().unwrap_or_default();
        assert!(message.contains("2.9.9"));
        assert!(message.contains("3.0.0"));
    }

    #[tokio::test]
    async fn install_failure_returns_false_without_rollback() {
        let fx = fixture("2.5.0");
        FakeTools::set(&fx.tools.fail_install);

        assert!(!fx.manager.update("2.5.0", None).await.expect("no throw"));
        assert!(fx.runner.extractions().is_empty());
        let history = fx.manager.get_update_history();
        assert!(!history[0].success);
        assert!(history[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("E404")));
    }

    #[tokio::test]
    async fn backup_failure_does_not_abort_update() {
        let fx = fixture("2.5.0");
        FakeTools::set(&fx.tools.fail_compress);

        assert!(fx.manager.update("2.5.0", None).await.expect("update"));
        assert!(fx.manager.list_rollback_points().expect("points").is_empty());
        assert_eq!(fx.runner.installs(), vec!["3.0.0"]);
    }

    #[tokio::test]
    async fn unwritable_history_does_not_fail_update() {
        let fx = fixture("2.5.0");
        std::fs::create_dir_all(fx.config.update_history_path()).expect("block history path");

        assert!(fx.manager.update("2.5.0", None).await.expect("update"));
        assert!(fx.manager.get_update_history().is_empty());
    }

    #[tokio::test]
    async fn concurrent_update_is_rejected() {
        let fx = fixture("2.5.0");
        let _held = UpdateLock::acquire(&fx.config.lock_path()).expect("hold lock");
        assert!(matches!(
            fx.manager.update("2.5.0", None).await,
            Err(UpdateError::LockUnavailable(_))
        ));
        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn history_is_capped() {
        let fx = fixture("2.5.0");
        for _ in 0..(UPDATE_HISTORY_CAP + 2) {
            fx.manager.update("3.0.0", Some("3.0.0")).await.expect("update");
        }
        assert_eq!(fx.manager.get_update_history().len(), UPDATE_HISTORY_CAP);
    }

    #[tokio::test]
    async fn manual_rollback_uses_newest_file_by_mtime() {
        let fx = fixture("2.5.0");
        let backups = fx.config.backups_dir();
        let older = backups.join("backup-9.9.9-2030-01-01T00-00-00-000Z.tar.gz");
        let newer = backups.join("backup-1.0.0-2020-01-01T00-00-00-000Z.tar.gz");
        touch(&older);
        tokio::time::sleep(Duration::from_millis(20)).await;
        touch(&newer);
        touch(&backups.join("notes.txt"));

        assert!(fx.manager.rollback(None).await.expect("rollback"));
        assert_eq!(fx.runner.extractions(), vec![newer.display().to_string()]);
        assert!(fx.runner.installs().is_empty());
        assert_eq!(
            fx.manager.list_backups(),
            vec![
                "backup-1.0.0-2020-01-01T00-00-00-000Z.tar.gz".to_string(),
                "backup-9.9.9-2030-01-01T00-00-00-000Z.tar.gz".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn manual_rollback_survives_corrupt_ledger() {
        let fx = fixture("2.5.0");
        fx.manager.update("2.5.0", None).await.expect("update");
        std::fs::write(fx.config.rollback_history_path(), "{corrupt").expect("corrupt");

        assert!(fx.manager.list_rollback_points().is_err());
        assert!(fx.manager.rollback(None).await.expect("rollback"));
        assert_eq!(fx.runner.extractions().len(), 1);
    }

    #[tokio::test]
    async fn manual_rollback_without_backups_is_false() {
        let fx = fixture("2.5.0");
        assert!(!fx.manager.rollback(None).await.expect("no backups"));
        assert!(!fx
            .manager
            .rollback(Some(Path::new("backup-missing.tar.gz")))
            .await
            .expect("missing file"));

        fx.manager.update("2.5.0", None).await.expect("update");
        FakeTools::set(&fx.tools.fail_extract);
        assert!(!fx.manager.rollback(None).await.expect("extract failure"));
    }

    #[tokio::test]
    async fn explicit_backup_name_resolves_in_backup_dir() {
        let fx = fixture("2.5.0");
        let name = "backup-2.0.0-2026-01-01T00-00-00-000Z.tar.gz";
        touch(&fx.config.backups_dir().join(name));

        assert!(fx.manager.rollback(Some(Path::new(name))).await.expect("rollback"));
        assert_eq!(
            fx.runner.extractions(),
            vec![fx.config.backups_dir().join(name).display().to_string()]
        );
    }

    #[tokio::test]
    async fn changelog_falls_back_to_sentinel() {
        let fx = fixture("2.5.0");
        assert_eq!(
            fx.manager.get_changelog(None).await,
            "## Features\n- feat: chains"
        );
        assert_eq!(fx.manager.get_changelog(Some("2.5.0")).await, "- fix: history");
        assert_eq!(
            fx.manager.get_changelog(Some("7.0.0")).await,
            CHANGELOG_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn backups_listing_is_empty_without_directory() {
        let fx = fixture("2.5.0");
        assert!(!fx.config.backups_dir().exists());
        assert!(fx.manager.list_backups().is_empty());
        assert!(fx.dir.path().exists());
    }

    #[tokio::test]
    async fn health_reports_installed_state() {
        let fx = fixture("3.0.0");
        let health = fx.manager.validate_update_health().await;
        assert!(health.passed);
        assert_eq!(fx.manager.installed_version().await.expect("version"), "3.0.0");
    }

    #[tokio::test]
    async fn guarded_update_under_contention_touches_nothing() {
        let fx = fixture("2.5.0");
        fx.manager
            .rollback_manager()
            .create_rollback_point("2.0.0", None)
            .await
            .expect("point");
        let _held = UpdateLock::acquire(&fx.config.lock_path()).expect("hold lock");

        assert!(matches!(
            fx.manager.update_with_auto_rollback("2.5.0", None).await,
            Err(UpdateError::LockUnavailable(_))
        ));
        assert!(fx.runner.extractions().is_empty());
        assert!(fx.runner.installs().is_empty());
        assert!(fx.manager.get_update_history().is_empty());
    }

    #[tokio::test]
    async fn guarded_update_reverts_failed_verification() {
        let fx = fixture("2.5.0");
        *fx.tools.reported_after_install.lock().expect("lock") = Some("2.9.9".into());

        let err = fx
            .manager
            .update_with_auto_rollback("2.5.0", None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::VerificationMismatch { .. }));
        assert_eq!(fx.runner.extractions().len(), 1);
        assert_eq!(fx.runner.installs(), vec!["3.0.0", "2.5.0"]);
        assert!(!fx.manager.get_update_history()[0].success);
    }

    #[tokio::test]
    async fn guarded_update_skips_health_gate_when_current() {
        let fx = fixture("3.0.0");
        fx.manager
            .rollback_manager()
            .create_rollback_point("2.5.0", None)
            .await
            .expect("point");
        FakeTools::set(&fx.tools.binary_broken);

        assert!(fx
            .manager
            .update_with_auto_rollback("3.0.0", None)
            .await
            .expect("current"));
        assert!(fx.runner.extractions().is_empty());
        assert!(fx.runner.installs().is_empty());
    }

    #[tokio::test]
    async fn guarded_update_passes_healthy_install() {
        let fx = fixture("2.5.0");
        assert!(fx
            .manager
            .update_with_auto_rollback("2.5.0", None)
            .await
            .expect("update"));
        assert_eq!(fx.runner.installs(), vec!["3.0.0"]);
        assert!(fx.runner.extractions().is_empty());
        assert!(fx.manager.get_update_history()[0].success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_backup_file_prefers_working_directory() {
        let fx = fixture("2.5.0");
        let outside = fx.dir.path().join("elsewhere").join("backup-manual.tar.gz");
        touch(&outside);
        let cwd = std::env::current_dir().expect("cwd");
        let mut relative = PathBuf::new();
        for _ in cwd.components().skip(1) {
            relative.push("..");
        }
        let relative = relative.join(outside.strip_prefix("/").expect("absolute tempdir"));

        assert!(fx.manager.rollback(Some(&relative)).await.expect("rollback"));
        assert_eq!(fx.runner.extractions(), vec![relative.display().to_string()]);
    }
}
