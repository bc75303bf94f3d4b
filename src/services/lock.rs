//! Single-writer lock around host mutation. The lock file holds
//! `<pid>:<operation>`; a file whose pid is no longer alive is stale and gets
//! cleared, everything else is a live holder and the acquire fails or retries.

use crate::domain::errors::{ProError, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOCK_MAX_RETRIES: u32 = 12;
pub const LOCK_RETRY_SLEEP: Duration = Duration::from_secs(10);

pub struct LockFile {
    path: PathBuf,
    holder: String,
}

/// Held lock. Removes the file on drop so an early return or a failed
/// operation never leaves the machine locked.
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    pub fn new(path: PathBuf, holder: &str) -> Self {
        Self {
            path,
            holder: holder.to_string(),
        }
    }

    /// One attempt: create the file exclusively, or fail with the live holder.
    pub fn try_acquire(&self) -> Result<LockGuard> {
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    write!(file, "{}:{}", std::process::id(), self.holder)?;
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_holder(&self.path)? {
                        Some((pid, holder)) if pid_alive(pid) => {
                            return Err(ProError::LockHeld {
                                lock_request: self.holder.clone(),
                                lock_holder: holder,
                                pid,
                            });
                        }
                        _ => {
                            // Stale or unreadable lock from a dead process.
                            log::warn!("clearing stale lock file {}", self.path.display());
                            clear_lock_file_if_present(&self.path)?;
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Retrying acquire for interactive use: another client finishing soon
    /// should not fail the command.
    pub fn acquire(&self, max_retries: u32, sleep: Duration) -> Result<LockGuard> {
        let mut attempt = 0;
        loop {
            match self.try_acquire() {
                Err(ProError::LockHeld {
                    lock_request,
                    lock_holder,
                    pid,
                }) if attempt < max_retries => {
                    attempt += 1;
                    log::info!(
                        "lock held by {} (pid:{}), retry {}/{} for {}",
                        lock_holder,
                        pid,
                        attempt,
                        max_retries,
                        lock_request
                    );
                    std::thread::sleep(sleep);
                }
                other => return other,
            }
        }
    }
}

impl LockGuard {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        clear_lock_file_if_present(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = clear_lock_file_if_present(&self.path);
        }
    }
}

pub fn clear_lock_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn read_holder(path: &Path) -> Result<Option<(i32, String)>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        // Racing with the holder's release is not an error.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let Some((pid, holder)) = raw.trim().split_once(':') else {
        return Ok(None);
    };
    match pid.parse::<i32>() {
        Ok(pid) => Ok(Some((pid, holder.to_string()))),
        Err(_) => Ok(None),
    }
}

/// Signal 0 probes for existence without touching the process.
fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}
