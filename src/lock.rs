// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Run-exclusivity lock.
//!
//! Only one replication run may be active on a host. [`RunGuard`] takes an
//! exclusive advisory lock on a named lock file without blocking; a second
//! run sees the lock held and aborts with
//! [`SyncError::AlreadyRunning`] before touching logs or stores.
//!
//! The lock lives exactly as long as the guard. If the process dies, the
//! OS drops the lock with the file descriptor, so no stale-lock cleanup is
//! ever needed. The file itself is left in place; its contents (holder pid
//! and start time) are informational only.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// What the lock holder writes into the lock file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLockMeta {
    pub pid: u32,
    pub started_at_ms: u64,
}

impl RunLockMeta {
    fn current() -> Self {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            pid: std::process::id(),
            started_at_ms,
        }
    }
}

/// Held run lock. Released on drop.
#[derive(Debug)]
pub struct RunGuard {
    path: PathBuf,
    file: File,
    meta: RunLockMeta,
}

impl RunGuard {
    /// Try to take the lock at `path` without waiting.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| lock_error(path, source))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| lock_error(path, source))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(SyncError::AlreadyRunning {
                    path: path.to_path_buf(),
                })
            }
            Err(TryLockError::Error(source)) => return Err(lock_error(path, source)),
        }

        let meta = RunLockMeta::current();
        write_meta(&mut file, &meta).map_err(|source| lock_error(path, source))?;

        tracing::debug!(path = %path.display(), pid = meta.pid, "Run lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &RunLockMeta {
        &self.meta
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock too; unlock explicitly so
        // the release does not depend on other handles to the file.
        let _ = self.file.unlock();
    }
}

/// Read the metadata of the current (or last) holder, if readable.
pub fn holder(path: &Path) -> Option<RunLockMeta> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(contents.trim()).ok()
}

fn write_meta(file: &mut File, meta: &RunLockMeta) -> std::io::Result<()> {
    let json = serde_json::to_string(meta).map_err(std::io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_data()
}

fn lock_error(path: &Path, source: std::io::Error) -> SyncError {
    SyncError::Lock {
        path: path.to_path_buf(),
        source,
    }
}
