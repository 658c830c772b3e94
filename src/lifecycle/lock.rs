// src/lifecycle/lock.rs

//! Per-key file locks of the cache
//!
//! Source folders are locked per `(ref, recipe revision)` and package folders
//! per package id. Locks are `flock`-style advisory locks held for the life
//! of the guard, so they serialize both threads of one run and concurrent
//! processes sharing a cache.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An exclusive lock on one cache key
#[derive(Debug)]
pub struct CacheLock {
    /// Kept open to hold the lock
    file: File,
    path: PathBuf,
}

fn open(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?)
}

impl CacheLock {
    /// Acquire the lock, blocking until it is free
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open(path)?;
        file.lock_exclusive()
            .map_err(|e| Error::IoError(format!("cannot lock {}: {}", path.display(), e)))?;
        debug!("Locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Acquire the lock if nobody holds it
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(Error::IoError(format!("cannot lock {}: {}", path.display(), e))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released {}", self.path.display());
    }
}

/// File name of a lock for a cache key made of path segments
pub fn lock_name(segments: &[&str]) -> String {
    let key: Vec<String> = segments
        .iter()
        .map(|s| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
                .collect()
        })
        .collect();
    format!("{}.lock", key.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_within_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks/zlib.lock");
        let held = CacheLock::acquire(&path).unwrap();
        assert!(CacheLock::try_acquire(&path).unwrap().is_none());
        drop(held);
        assert!(CacheLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_waiters_block_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.lock");
        let held = CacheLock::acquire(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            let _lock = CacheLock::acquire(&waiter_path).unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_lock_name() {
        assert_eq!(lock_name(&["sources", "zlib", "1.3.1", "abc"]), "sources-zlib-1.3.1-abc.lock");
        assert_eq!(lock_name(&["a/b", "c d"]), "a_b-c_d.lock");
    }
}
