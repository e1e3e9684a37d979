/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::process
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Interface with the platform package manager and the
    archive utility: install a pinned version, query the
    installed binary, compress and extract installation trees.

  Security / Safety Notes:
    Executes package manager and tar binaries with user
    privileges only; no privilege escalation is attempted.
    Arguments are passed as argv, never through a shell.

  Dependencies:
    tokio::process for async command execution, async-trait
    for the runner seam.

  Operational Scope:
    Supplies the rollback and update managers with every
    subprocess they need. Subprocesses run to completion; no
    deadline is enforced.

  Revision History:
    2026-10-18 COD  Generalised pacman layer into runner seam.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Structured parsing with clear failure modes
    - Reusable helpers for external command diagnostics
============================================================*/

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Result, UpdateError};
use crate::version::extract_version;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Seam for launching external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output. Spawn failures
    /// are errors; non-zero exits are reported through `CommandOutput`.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runner backed by real subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| map_spawn_error(err, program))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Platform package manager wrapper (`<program> install -g <pkg>@<ver>`).
#[derive(Clone)]
pub struct PackageManager {
    runner: Arc<dyn CommandRunner>,
    program: String,
    package: String,
    binary: String,
}

impl PackageManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        package: impl Into<String>,
        binary: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            package: package.into(),
            binary: binary.into(),
        }
    }

    /// Install exactly `version` of the managed package.
    pub async fn install(&self, version: &str) -> Result<()> {
        let spec = format!("{}@{}", self.package, version);
        let args = vec!["install".to_string(), "-g".to_string(), spec.clone()];
        let output = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(|err| UpdateError::InstallFailed {
                version: version.to_string(),
                reason: err.to_string(),
            })?;

        if !output.success() {
            return Err(UpdateError::InstallFailed {
                version: version.to_string(),
                reason: failure_detail(&format!("{} install -g {spec}", self.program), &output),
            });
        }
        Ok(())
    }

    /// Ask the installed binary for its version (`<binary> --version`).
    pub async fn installed_version(&self) -> Result<String> {
        let args = vec!["--version".to_string()];
        let output = self.runner.run(&self.binary, &args).await?;
        if !output.success() {
            return Err(UpdateError::CommandFailure {
                command: format!("{} --version", self.binary),
                status: output.status,
                stderr: output.stderr,
            });
        }
        extract_version(&output.stdout).ok_or_else(|| {
            UpdateError::Serialization(format!(
                "`{} --version` emitted no version: {}",
                self.binary, output.stdout
            ))
        })
    }
}

/// Archive utility wrapper (`tar -czf` / `tar -xzf`).
#[derive(Clone)]
pub struct Archiver {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl Archiver {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Compress `source` into `archive`, storing paths relative to the
    /// source's parent so extraction restores the directory in place.
    pub async fn compress(&self, source: &Path, archive: &Path) -> Result<()> {
        let (parent, name) = split_tree(source)?;
        let args = vec![
            "-czf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            parent,
            name,
        ];
        let output = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(|err| UpdateError::BackupFailed(err.to_string()))?;
        if !output.success() {
            return Err(UpdateError::BackupFailed(failure_detail(
                &format!("{} -czf {}", self.program, archive.display()),
                &output,
            )));
        }
        Ok(())
    }

    /// Extract `archive` over the tree it was taken from.
    pub async fn extract(&self, archive: &Path, target: &Path) -> Result<()> {
        let extraction_failed = |reason: String| UpdateError::ExtractionFailed {
            archive: archive.display().to_string(),
            reason,
        };
        if !archive.is_file() {
            return Err(extraction_failed("archive missing".into()));
        }
        let (parent, _) = split_tree(target).map_err(|err| extraction_failed(err.to_string()))?;
        std::fs::create_dir_all(&parent).map_err(|err| extraction_failed(err.to_string()))?;

        let args = vec![
            "-xzf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            parent,
        ];
        let output = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(|err| extraction_failed(err.to_string()))?;
        if !output.success() {
            return Err(extraction_failed(failure_detail(
                &format!("{} -xzf", self.program),
                &output,
            )));
        }
        Ok(())
    }
}

fn split_tree(path: &Path) -> Result<(String, String)> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            UpdateError::InvalidInput(format!("{} has no directory name", path.display()))
        })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| parent.display().to_string())
        .unwrap_or_else(|| ".".to_string());
    Ok((parent, name))
}

fn failure_detail(command: &str, output: &CommandOutput) -> String {
    let stderr = if output.stderr.is_empty() {
        "no diagnostic output"
    } else {
        output.stderr.as_str()
    };
    format!("`{command}` exited with status {}: {stderr}", output.status)
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> UpdateError {
    if err.kind() == io::ErrorKind::NotFound {
        UpdateError::CommandMissing {
            command: command.into(),
        }
    } else {
        UpdateError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
