use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Contents of the lock resource: who holds it, since when, and for which
/// run. Stored as TOML in a single named file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub host: String,
    pub run_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Process liveness, isolated behind a trait so stale-lock detection can be
/// exercised without killing real processes.
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness via signal 0. Only meaningful for processes on this host.
pub struct SystemLiveness;

impl ProcessLiveness for SystemLiveness {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        // No portable liveness probe; the max-age cutover still applies.
        true
    }
}

/// File-backed mutual exclusion for ingestion cycles. At most one cycle may
/// run at a time across process restarts, including ungraceful crashes.
pub struct CycleLock<L: ProcessLiveness = SystemLiveness> {
    path: PathBuf,
    liveness: L,
    /// Locks older than this are reclaimed regardless of liveness, so a
    /// liveness false positive cannot wedge the scheduler forever.
    max_age: Duration,
}

impl CycleLock<SystemLiveness> {
    pub fn new(path: impl AsRef<Path>, max_age: Duration) -> Self {
        Self::with_liveness(path, max_age, SystemLiveness)
    }
}

impl<L: ProcessLiveness> CycleLock<L> {
    pub fn with_liveness(path: impl AsRef<Path>, max_age: Duration, liveness: L) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            liveness,
            max_age,
        }
    }

    /// Acquire the lock for the given run. Returns `AppError::LockBusy` if
    /// a live owner holds it; reclaims stale locks (dead owner, or owner
    /// past the max-age cutover) and retries the creation exactly once.
    pub fn acquire(&self, run_id: &str) -> Result<LockInfo> {
        match self.try_create(run_id) {
            Ok(info) => return Ok(info),
            Err(e) if !exists_error(&e) => return Err(e),
            Err(_) => {}
        }

        let holder = self.read_current()?;
        if let Some(holder) = &holder {
            if self.holder_is_live(holder) {
                tracing::info!(
                    holder_pid = holder.pid,
                    holder_run = %holder.run_id,
                    "cycle lock is busy"
                );
                return Err(AppError::LockBusy);
            }
            tracing::warn!(
                holder_pid = holder.pid,
                holder_run = %holder.run_id,
                holder_host = %holder.host,
                "reclaiming stale cycle lock"
            );
        } else {
            tracing::warn!(path = %self.path.display(), "reclaiming unreadable cycle lock");
        }

        // Stale or unreadable: clear it and retry once. If another process
        // wins the race, that create fails and we report Busy.
        let _ = std::fs::remove_file(&self.path);
        match self.try_create(run_id) {
            Ok(info) => Ok(info),
            Err(e) if exists_error(&e) => Err(AppError::LockBusy),
            Err(e) => Err(e),
        }
    }

    /// Idempotent release. A missing file or a record owned by someone
    /// else is a warning, not an error, so double-release during error
    /// handling is harmless.
    pub fn release(&self, run_id: &str) -> Result<()> {
        let holder = match self.read_current()? {
            Some(holder) => holder,
            None => {
                tracing::warn!(run_id = %run_id, "releasing a lock that does not exist");
                return Ok(());
            }
        };

        if holder.pid != std::process::id() || holder.run_id != run_id {
            tracing::warn!(
                run_id = %run_id,
                holder_pid = holder.pid,
                holder_run = %holder.run_id,
                "lock is not owned by this run; leaving it in place"
            );
            return Ok(());
        }

        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// The current lock record, if the file exists and parses.
    pub fn read_current(&self) -> Result<Option<LockInfo>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&content).ok())
    }

    fn holder_is_live(&self, holder: &LockInfo) -> bool {
        let age = Utc::now().signed_duration_since(holder.acquired_at);
        if age.to_std().map(|a| a > self.max_age).unwrap_or(false) {
            return false;
        }

        // Liveness can only be probed on the lock holder's own host; a lock
        // from elsewhere is judged by age alone.
        if holder.host == local_hostname() {
            self.liveness.is_alive(holder.pid)
        } else {
            true
        }
    }

    fn try_create(&self, run_id: &str) -> Result<LockInfo> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let info = LockInfo {
            pid: std::process::id(),
            host: local_hostname(),
            run_id: run_id.to_string(),
            acquired_at: Utc::now(),
        };
        let content = toml::to_string(&info).map_err(|e| AppError::Config(e.to_string()))?;

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(content.as_bytes())?;
        Ok(info)
    }
}

fn exists_error(e: &AppError) -> bool {
    matches!(e, AppError::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists)
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
