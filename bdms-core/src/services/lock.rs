//! Run lock - serializes migration runs from cooperating processes
//!
//! An exclusive advisory lock on `<database>.migrate.lock`. The lock is
//! released when the [`RunLock`] is dropped; the file itself is left in
//! place so two processes never race on deleting and recreating it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::domain::result::{Error, Result};

/// Initial delay between lock attempts, doubled after each failure
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Upper bound for a single backoff delay
const MAX_RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock file used for a database file
    pub fn lock_path(db_path: &Path) -> PathBuf {
        let mut name = db_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".migrate.lock");
        db_path.with_file_name(name)
    }

    /// Acquire the lock, retrying with exponential backoff until `timeout`
    pub fn acquire(db_path: &Path, timeout: Duration) -> Result<Self> {
        let path = Self::lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let started = Instant::now();
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;
        let mut warned = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %path.display(), "acquired run lock");
                    return Ok(Self { file, path });
                }
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if started.elapsed() >= timeout {
                        return Err(Error::Locked(path.display().to_string()));
                    }
                    if !warned {
                        warn!(lock = %path.display(), "another migration run holds the lock, waiting");
                        warned = true;
                    }
                    let remaining = timeout.saturating_sub(started.elapsed());
                    thread::sleep(Duration::from_millis(delay_ms).min(remaining));
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), "failed to release run lock: {}", e);
        }
    }
}
