//! Advisory store lock: an OS exclusive lock on a sibling `.lock` file,
//! acquired with exponential backoff and jitter.

use crate::VtecError;
use crate::primitives::{LOCK_BACKOFF_BASE_MS, LOCK_BACKOFF_MAX_MS};
use rand::Rng;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// =============================================================================
// BACKOFF
// =============================================================================

/// Exponential backoff with jitter.
///
/// Each delay is drawn uniformly from `[cap / 2, cap]` where `cap`
/// doubles per attempt up to the configured maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(LOCK_BACKOFF_BASE_MS),
            Duration::from_millis(LOCK_BACKOFF_MAX_MS),
        )
    }
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// The next delay to wait.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        let cap = self.base.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        let cap_ms = cap.as_millis() as u64;
        let jittered = rand::thread_rng().gen_range(cap_ms / 2..=cap_ms);
        Duration::from_millis(jittered)
    }
}

// =============================================================================
// LOCK FILE
// =============================================================================

/// Path of the lock file next to a store file: `records.json` → `records.json.lock`.
#[must_use]
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// A lock file plus the policy used to wait for it.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    timeout: Option<Duration>,
}

/// Holds the exclusive lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to unlock store");
        } else {
            tracing::debug!(path = %self.path.display(), "store lock released");
        }
    }
}

impl LockFile {
    /// Lock file guarding `store_path`. Waits forever by default.
    #[must_use]
    pub fn for_store(store_path: &Path) -> Self {
        Self {
            path: lock_path_for(store_path),
            timeout: None,
        }
    }

    /// Give up with a Transport error after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, VtecError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| VtecError::Transport(format!("open {}: {}", self.path.display(), e)))
    }

    /// One attempt; `None` when another holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>, VtecError> {
        let file = self.open()?;
        match file.try_lock() {
            Ok(()) => Ok(Some(LockGuard {
                file,
                path: self.path.clone(),
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(VtecError::Transport(format!(
                "lock {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Block until the lock is held, backing off between attempts.
    pub fn acquire(&self) -> Result<LockGuard, VtecError> {
        let started = Instant::now();
        let mut backoff = Backoff::default();
        loop {
            if let Some(guard) = self.try_acquire()? {
                tracing::debug!(
                    path = %self.path.display(),
                    retries = backoff.attempts(),
                    "store lock acquired"
                );
                return Ok(guard);
            }
            let delay = backoff.next_delay();
            if let Some(timeout) = self.timeout
                && started.elapsed() + delay > timeout
            {
                return Err(VtecError::Transport(format!(
                    "timed out waiting for lock {}",
                    self.path.display()
                )));
            }
            tracing::trace!(path = %self.path.display(), ?delay, "store lock busy");
            std::thread::sleep(delay);
        }
    }
}
