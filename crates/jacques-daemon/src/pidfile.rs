//! PID file handling.
//!
//! The daemon claims `~/.jacques/server.pid` at startup. A PID file that
//! references a live process means another instance is running and startup
//! must fail with its own exit code; a dead referent is stale debris.

use crate::error::DaemonError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim the PID file for this process.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let path = path.into();
        if let Some(pid) = read_pid(&path) {
            if pid != std::process::id() && pid_alive(pid) {
                return Err(DaemonError::PidFileHeld {
                    path: path.display().to_string(),
                    pid,
                });
            }
            info!(path = %path.display(), stale_pid = pid, "replacing stale PID file");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the PID file. Also runs on drop; explicit release just makes
    /// shutdown logs readable.
    pub fn release(self) {
        remove(&self.path);
        std::mem::forget(self);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        remove(&self.path);
    }
}

fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove PID file");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

/// Whether a pid refers to a live process.
#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(pid: u32) -> bool {
    // `kill -0` semantics without raising a signal.
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
