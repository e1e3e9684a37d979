/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for Syn-Syu-Update. Checks the release feed,
    applies updates with rollback points, and exposes restore,
    history, and health commands to operators.

  Security / Safety Notes:
    Operates within user privileges. Executes the package
    manager, tar, and the installed binary; performs HTTPS GET
    requests only.

  Dependencies:
    clap for CLI parsing, chrono for session stamps,
    serde_json for structured output.

  Operational Scope:
    Invoked by the Syn-Syu Bash layer via `syn-syu self-update`
    or directly by operators recovering an installation.

  Revision History:
    2026-10-18 COD  Authored Syn-Syu-Update runtime.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI and config file
============================================================*/

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;

use synsyu_update::{
    generate_summary, Logger, Result, UpdateError, UpdateManager, UpdaterConfig,
};

/// Command-line arguments for Syn-Syu-Update.
#[derive(Debug, Parser)]
#[command(
    name = "Syn-Syu-Update",
    version,
    author = "Synavera Systems",
    about = "Self-update and rollback for Syn-Syu"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH", global = true)]
    log: Option<PathBuf>,
    /// Enable verbose logging to stderr.
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compare the installed version against the release feed.
    Check {
        /// Version to compare instead of querying the installed binary.
        #[arg(long, value_name = "VERSION")]
        current: Option<String>,
    },
    /// Install the latest release, or an explicit version.
    Update {
        #[arg(long, value_name = "VERSION")]
        target: Option<String>,
        #[arg(long, value_name = "VERSION")]
        current: Option<String>,
        /// Validate health afterwards and restore on failure.
        #[arg(long, action = ArgAction::SetTrue)]
        auto_rollback: bool,
    },
    /// Restore a previous installation.
    Rollback {
        /// Restore this backup archive, ignoring the ledger. Relative paths
        /// are tried in the working directory, then in the backups directory.
        #[arg(long, value_name = "FILE", conflicts_with_all = ["version", "chain"])]
        file: Option<PathBuf>,
        /// Restore the rollback point recorded for this version.
        #[arg(long, value_name = "VERSION", conflicts_with = "chain")]
        version: Option<String>,
        /// Undo this many updates at once.
        #[arg(long, value_name = "N")]
        chain: Option<usize>,
    },
    /// Extract the newest rollback point without reinstalling.
    EmergencyRollback,
    /// Show recorded update attempts.
    History,
    /// Print the changelog of a release (latest when omitted).
    Changelog { version: Option<String> },
    /// Summarise changes between two releases.
    Diff {
        from: String,
        to: String,
        /// Aggregate every release in the range.
        #[arg(long, action = ArgAction::SetTrue)]
        cumulative: bool,
    },
    /// List backup archives, newest first.
    Backups,
    /// List rollback points, newest first.
    Points,
    /// Validate the installation.
    Health,
    /// Prune rollback points to the newest N.
    Cleanup {
        #[arg(long, value_name = "N")]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[Syn-Syu-Update] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = UpdaterConfig::load_from_optional_path(cli.config.as_deref())?;

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("update_{session_stamp}.log")));
    let logger = Arc::new(Logger::new(Some(log_path), cli.verbose)?);
    logger.info("INIT", "Syn-Syu Update awakening.");
    logger.debug(
        "CONFIG",
        format!(
            "home={} install={} feed={}/{}",
            config.home_dir.display(),
            config.install_dir.display(),
            config.feed.owner,
            config.feed.repo
        ),
    );

    let manager = UpdateManager::new(&config, logger.clone())?;
    let code = dispatch(&manager, cli.command, &logger).await;
    let warnings = logger.warning_count();
    if warnings > 0 {
        logger.info("SUMMARY", format!("Completed with {warnings} warning(s)."));
    }
    logger.finalize()?;
    code
}

async fn dispatch(manager: &UpdateManager, command: Command, logger: &Logger) -> Result<ExitCode> {
    match command {
        Command::Check { current } => {
            let current = resolve_current(manager, current).await?;
            let result = manager.check_for_updates(&current).await;
            if result.has_update {
                let kind = result
                    .update_type
                    .map(|kind| kind.to_string())
                    .unwrap_or_default();
                println!(
                    "→ Update available: {} → {} ({kind})",
                    result.current_version, result.latest_version
                );
            } else {
                println!("→ {} is current.", result.current_version);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Update {
            target,
            current,
            auto_rollback,
        } => {
            let current = resolve_current(manager, current).await?;
            let current = current.as_str();
            let target = target.as_deref();
            let updated = if auto_rollback {
                manager.update_with_auto_rollback(current, target).await?
            } else {
                manager.update(current, target).await?
            };
            if updated {
                println!("→ Update complete.");
                logger.info("COMPLETE", "Update transaction closed.");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("→ Update failed; see `history` for details.");
                Ok(ExitCode::from(1))
            }
        }
        Command::Rollback {
            file,
            version,
            chain,
        } => {
            let rollback = manager.rollback_manager();
            let restored = match (file, version, chain) {
                (Some(file), _, _) => manager.rollback(Some(&file)).await?,
                (None, Some(version), _) => rollback.rollback_to_version(&version).await?,
                (None, None, Some(steps)) => rollback.rollback_chain(steps).await?,
                (None, None, None) => match rollback.rollback_to_previous().await {
                    Err(UpdateError::NoRollbackPoints) | Err(UpdateError::Serialization(_)) => {
                        logger.warn("RESTORE", "Ledger unusable; falling back to newest backup");
                        manager.rollback(None).await?
                    }
                    other => other?,
                },
            };
            report_restore(restored)
        }
        Command::EmergencyRollback => report_restore(manager.emergency_rollback().await?),
        Command::History => print_json(&manager.get_update_history()),
        Command::Changelog { version } => {
            println!("{}", manager.get_changelog(version.as_deref()).await);
            Ok(ExitCode::SUCCESS)
        }
        Command::Diff {
            from,
            to,
            cumulative,
        } => {
            let generator = manager.diff_generator();
            let diff = if cumulative {
                generator.generate_cumulative_diff(&from, &to).await?
            } else {
                generator.generate_diff(&from, &to).await?
            };
            println!("{}", generate_summary(&diff));
            Ok(ExitCode::SUCCESS)
        }
        Command::Backups => {
            for name in manager.list_backups() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Points => print_json(&manager.list_rollback_points()?),
        Command::Health => {
            let health = manager.validate_update_health().await;
            print_json(&health)?;
            Ok(if health.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Cleanup { keep } => {
            let removed = manager.rollback_manager().cleanup_rollback_points(keep)?;
            println!("→ Removed {removed} rollback points.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn resolve_current(manager: &UpdateManager, current: Option<String>) -> Result<String> {
    match current {
        Some(version) => Ok(version),
        None => manager.installed_version().await,
    }
}

fn report_restore(restored: bool) -> Result<ExitCode> {
    if restored {
        println!("→ Installation restored.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("→ Restore failed; try `emergency-rollback` or `rollback --file`.");
        Ok(ExitCode::from(1))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| UpdateError::Serialization(format!("Failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}
