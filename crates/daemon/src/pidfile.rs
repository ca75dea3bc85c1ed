// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - PID File Management
// One daemon per user: a second instance would spawn a second tunnel

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// PID file guard, removes the file on drop
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Claim the default PID file.
    ///
    /// Fails if another live daemon holds it; stale files are replaced.
    pub fn create() -> Result<Self> {
        Self::create_at(Self::pid_file_path()?)
    }

    pub fn create_at(path: PathBuf) -> Result<Self> {
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(contents) => match contents.trim().parse::<u32>() {
                    Ok(pid) if is_process_running(pid) => {
                        anyhow::bail!(
                            "Daemon is already running with PID {}. \
                             Stop it first or remove {} if it's stale.",
                            pid,
                            path.display()
                        );
                    }
                    Ok(pid) => {
                        warn!("Removing stale PID file for process {} (not running)", pid);
                        fs::remove_file(&path).context("Failed to remove stale PID file")?;
                    }
                    Err(_) => {
                        warn!("PID file {} is corrupt, replacing it", path.display());
                        fs::remove_file(&path).context("Failed to remove corrupt PID file")?;
                    }
                },
                Err(e) => {
                    warn!("Failed to read PID file {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create runtime directory")?;
        }

        let pid = std::process::id();
        fs::write(&path, pid.to_string()).context("Failed to write PID file")?;

        info!("Created PID file at {} with PID {}", path.display(), pid);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn pid_file_path() -> Result<PathBuf> {
        let runtime_dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .ok_or_else(|| anyhow::anyhow!("Could not determine runtime directory"))?;

        Ok(runtime_dir.join("public-tunnel").join("daemon.pid"))
    }
}

/// `kill(pid, 0)` probes for the process without signalling it
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: signal 0 performs only the existence and permission check
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }

    // EPERM: exists, owned by someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    warn!("Process existence check not implemented for this platform");
    true
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed PID file: {}", self.path.display()),
            Err(e) => warn!("Failed to remove PID file {}: {}", self.path.display(), e),
        }
    }
}
