//! Process Lock File Module
//!
//! One supervisor per data directory. Two daemons sharing a sled store
//! would both try to restart the same units.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// PID file held for the life of the daemon, removed on drop
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".warden.lock";

    /// Acquire the lock for `data_dir`, creating the directory if needed.
    ///
    /// Fails if the PID recorded in an existing lock file is still running.
    /// A lock left behind by a dead process, or one naming our own PID, is
    /// replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::read_pid(&lock_path) {
                Ok(pid) if pid != std::process::id() && Self::is_process_running(pid) => {
                    bail!(
                        "Another warden instance is already running (PID: {})\n\
                         \n\
                         Stop it, or remove the lock file if that process is gone:\n\
                            rm {}",
                        pid,
                        lock_path.display()
                    );
                }
                Ok(pid) => {
                    tracing::info!(pid, "Removing stale lock file from previous instance");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        writeln!(file, "{pid}").context("Failed to write PID to lock file")?;

        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    fn read_pid(lock_path: &Path) -> Result<u32> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
        contents
            .trim()
            .parse()
            .context("Failed to parse PID from lock file")
    }

    /// Signal 0 probes for existence without delivering anything
    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn is_process_running(pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        let rc = unsafe { libc::kill(pid, 0) };
        // EPERM: alive but owned by someone else
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        true
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!(error = %e, "Failed to remove lock file");
            } else {
                tracing::debug!(path = %self.lock_path.display(), "Released process lock");
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
