//! Per-job exclusive locks
//!
//! Each job takes an advisory `flock` on `<state_dir>/locks/<job>.lock`. The
//! lock belongs to the open file, so it is released when the [`JobLock`] is
//! dropped or the process exits for any reason; a crashed job never leaves
//! the system wedged. The file itself is left in place and only records who
//! last held it, for diagnostics.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::constants::{files, manifest};
use crate::errors::{LockError, LockResult};

/// Retry policy for [`ConcurrencyGuard::acquire_blocking`]
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: manifest::LOCK_MAX_RETRIES,
            initial_backoff: Duration::from_millis(manifest::LOCK_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(manifest::LOCK_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a given attempt, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Upper bound on total waiting time
    pub fn total_wait(&self) -> Duration {
        (0..self.max_retries).map(|a| self.backoff(a)).sum()
    }
}

/// An acquired lock; released on drop
#[derive(Debug)]
pub struct JobLock {
    name: String,
    path: PathBuf,
    // Holding the handle keeps the flock
    file: File,
}

impl JobLock {
    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlock of {} failed: {}", self.path.display(), e);
        }
    }
}

/// Hands out per-job locks under one directory
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    lock_dir: PathBuf,
}

impl ConcurrencyGuard {
    /// Guard storing lock files in `lock_dir`
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    /// Lock file path for a job name
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.lock_dir
            .join(format!("{}.{}", name, files::LOCK_EXTENSION))
    }

    /// Try once to take the lock for `name`
    ///
    /// Returns `Ok(None)` if another process holds it.
    pub fn try_acquire(&self, name: &str) -> LockResult<Option<JobLock>> {
        let path = self.lock_path(name);
        let file = self.open_lock_file(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut lock = JobLock {
                    name: name.to_string(),
                    path,
                    file,
                };
                record_holder(&mut lock);
                debug!("Acquired lock {}", lock.path.display());
                Ok(Some(lock))
            }
            Err(e) if is_contended(&e) => {
                debug!("Lock {} is held by another process", path.display());
                Ok(None)
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    /// Take the lock for `name` or report it as held
    pub fn acquire(&self, name: &str) -> LockResult<JobLock> {
        self.try_acquire(name)?.ok_or_else(|| LockError::Held {
            job: name.to_string(),
            path: self.lock_path(name),
        })
    }

    /// Wait for the lock for `name`, retrying with exponential backoff
    pub async fn acquire_blocking(&self, name: &str, policy: RetryPolicy) -> LockResult<JobLock> {
        let mut attempt = 0;
        loop {
            if let Some(lock) = self.try_acquire(name)? {
                if attempt > 0 {
                    debug!("Acquired lock {} after {} retries", name, attempt);
                }
                return Ok(lock);
            }

            if attempt >= policy.max_retries {
                let path = self.lock_path(name);
                warn!(
                    "Gave up waiting for lock {} after {} attempts",
                    path.display(),
                    attempt + 1
                );
                return Err(LockError::Timeout {
                    path,
                    seconds: policy.total_wait().as_secs(),
                });
            }

            tokio::time::sleep(policy.backoff(attempt)).await;
            attempt += 1;
        }
    }

    fn open_lock_file(&self, path: &Path) -> LockResult<File> {
        if !self.lock_dir.exists() {
            std::fs::create_dir_all(&self.lock_dir).map_err(|source| LockError::Io {
                path: self.lock_dir.clone(),
                source,
            })?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Write pid and time into the lock file; failures only lose diagnostics
fn record_holder(lock: &mut JobLock) {
    let line = format!("{} {}\n", std::process::id(), Utc::now().to_rfc3339());
    let result = lock
        .file
        .set_len(0)
        .and_then(|_| lock.file.write_all(line.as_bytes()));
    if let Err(e) = result {
        debug!("Could not record lock holder in {}: {}", lock.path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp_dir = TempDir::new().unwrap();
        let guard = ConcurrencyGuard::new(temp_dir.path().join("locks"));

        let first = guard.try_acquire("sweep").unwrap();
        assert!(first.is_some());
        assert!(guard.try_acquire("sweep").unwrap().is_none());
        assert!(matches!(guard.acquire("sweep"), Err(LockError::Held { .. })));

        // Different jobs do not exclude each other
        assert!(guard.try_acquire("monitor").unwrap().is_some());

        drop(first);
        assert!(guard.try_acquire("sweep").unwrap().is_some());
    }

    #[test]
    fn test_lock_file_records_holder() {
        let temp_dir = TempDir::new().unwrap();
        let guard = ConcurrencyGuard::new(temp_dir.path());

        let lock = guard.acquire("recent").unwrap();
        assert_eq!(lock.name(), "recent");
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert!(content.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(50));
        assert_eq!(policy.backoff(60), Duration::from_millis(50));
        assert_eq!(policy.total_wait(), Duration::from_millis(10 + 20 + 40 + 50 + 50));
    }

    #[tokio::test]
    async fn test_acquire_blocking_waits_for_release() {
        let temp_dir = TempDir::new().unwrap();
        let guard = ConcurrencyGuard::new(temp_dir.path());
        let held = guard.acquire("manifest").unwrap();

        let policy = RetryPolicy {
            max_retries: 50,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        };
        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.acquire_blocking("manifest", policy).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);

        let lock = waiter.await.unwrap().unwrap();
        assert_eq!(lock.name(), "manifest");
    }

    #[tokio::test]
    async fn test_acquire_blocking_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let guard = ConcurrencyGuard::new(temp_dir.path());
        let _held = guard.acquire("manifest").unwrap();

        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let result = guard.acquire_blocking("manifest", policy).await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }
}
