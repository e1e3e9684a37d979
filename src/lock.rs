/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::lock
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Serialise update and restore transactions across processes
    with an advisory lock on `<home>/update.lock`.

  Security / Safety Notes:
    Uses flock(2) via libc on Unix; the lock is released when
    the guard drops or the process dies. The lock file itself
    is never removed.

  Dependencies:
    libc for flock.

  Operational Scope:
    Held for the whole of `UpdateManager::update` and manual
    `UpdateManager::rollback`.

  Revision History:
    2026-10-18 COD  Added cross-process update lock.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Fail fast on contention, never wait silently
============================================================*/

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, UpdateError};

/// Exclusive advisory lock; released on drop.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
}

impl UpdateLock {
    /// Take the lock without blocking; contention is `LockUnavailable`.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                UpdateError::Filesystem(format!(
                    "Failed to create lock directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| {
                UpdateError::Filesystem(format!(
                    "Failed to open lock file {}: {err}",
                    path.display()
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(UpdateError::LockUnavailable(path.display().to_string()));
                }
                return Err(UpdateError::Io(err));
            }
        }

        file.set_len(0)?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();

        Ok(Self { file })
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}
