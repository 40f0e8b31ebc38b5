//! Mount reference counting for concurrent launcher instances.
//!
//! Multiple instances of the same application (same user, same package) may
//! race to mount and unmount one overlay. The counter below is the advisory
//! guard: the second launch observes a positive count and skips re-mounting,
//! and unmount only fires when the count returns to zero.
//!
//! The counter is advisory only. The forced-removal path runs in a different
//! process lifetime and cannot observe it; it queries the mount table
//! directly and unmounts unconditionally.

use crate::RuntimeError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uncork_spec::UserDataLayout;

/// One launcher instance's claim on the overlay mount.
///
/// `acquire` increments the on-disk counter under an exclusive advisory lock
/// and reports the resulting count; `release` decrements and reports the
/// remainder. Dropping an unreleased guard decrements best-effort so a
/// panicking launcher does not strand the count (a crashed *process* still
/// can, which is why removal ignores the counter).
pub struct MountGuard {
    lock_path: PathBuf,
    count_path: PathBuf,
    released: bool,
}

impl MountGuard {
    /// Register one more live instance. Returns the guard and the count
    /// after increment; a result of 1 means this instance should mount.
    pub fn acquire(data: &UserDataLayout) -> Result<(Self, u32), RuntimeError> {
        let lock_path = data.mount_lock_file();
        let count_path = data.mount_count_file();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let count = with_lock(&lock_path, |_| {
            let count = read_count(&count_path).saturating_add(1);
            write_count(&count_path, count)?;
            Ok(count)
        })?;

        Ok((
            Self {
                lock_path,
                count_path,
                released: false,
            },
            count,
        ))
    }

    /// Unregister this instance. Returns the remaining count; 0 means the
    /// caller is the last instance and should unmount.
    pub fn release(mut self) -> Result<u32, RuntimeError> {
        self.released = true;
        self.decrement()
    }

    fn decrement(&self) -> Result<u32, RuntimeError> {
        with_lock(&self.lock_path, |_| {
            let count = read_count(&self.count_path).saturating_sub(1);
            write_count(&self.count_path, count)?;
            Ok(count)
        })
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.decrement();
        }
    }
}

/// Read the current count without acquiring a claim.
pub fn live_count(data: &UserDataLayout) -> u32 {
    read_count(&data.mount_count_file())
}

fn with_lock<T>(
    lock_path: &Path,
    f: impl FnOnce(&File) -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;
    lock_file
        .lock_exclusive()
        .map_err(|e| RuntimeError::LockFailed(e.to_string()))?;
    let result = f(&lock_file);
    let _ = fs2::FileExt::unlock(&lock_file);
    result
}

fn read_count(path: &Path) -> u32 {
    let Ok(mut file) = File::open(path) else {
        return 0;
    };
    let mut content = String::new();
    if file.read_to_string(&mut content).is_err() {
        return 0;
    }
    content.trim().parse().unwrap_or(0)
}

fn write_count(path: &Path, count: u32) -> Result<(), RuntimeError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{count}")?;
    file.sync_all()?;
    Ok(())
}
