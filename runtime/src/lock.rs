//! Advisory file lock serializing edits of the repositories file across
//! concurrent processes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chartscan_core::error::{Result, ScanError};

/// Time allowed for acquiring the repositories file lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// An exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try to take the lock once without blocking.
    ///
    /// Returns `Ok(None)` when another holder owns it.
    pub fn try_lock(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                ScanError::LockError(format!("failed to open lock file {}: {}", path.display(), e))
            })?;

        if lock_exclusive_nonblocking(&file)? {
            Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Take the lock, retrying every `retry_delay` until `timeout` elapses.
    pub async fn acquire(path: &Path, timeout: Duration, retry_delay: Duration) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_lock(path)? {
                tracing::debug!(path = %path.display(), "Acquired file lock");
                return Ok(lock);
            }
            if tokio::time::Instant::now() + retry_delay > deadline {
                return Err(ScanError::LockError(format!(
                    "timed out after {:?} waiting for {}",
                    timeout,
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "File lock busy, retrying");
            tokio::time::sleep(retry_delay).await;
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn lock_exclusive_nonblocking(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(ScanError::LockError(format!("flock failed: {}", err)))
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: see `lock_exclusive_nonblocking`.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn lock_exclusive_nonblocking(_file: &File) -> Result<bool> {
    tracing::warn!("Advisory file locking is not supported on this platform");
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_try_lock_creates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repositories.lock");
        let lock = FileLock::try_lock(&path).unwrap();
        assert!(lock.is_some());
        assert!(path.exists());
    }

    #[test]
    fn test_second_lock_is_busy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repositories.lock");
        let _held = FileLock::try_lock(&path).unwrap().unwrap();
        // flock locks belong to the open file description, so a second open conflicts.
        assert!(FileLock::try_lock(&path).unwrap().is_none());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repositories.lock");
        {
            let _held = FileLock::try_lock(&path).unwrap().unwrap();
        }
        assert!(FileLock::try_lock(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repositories.lock");
        let _held = FileLock::try_lock(&path).unwrap().unwrap();

        let err = FileLock::acquire(&path, Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::LockError(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_acquire_after_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repositories.lock");
        let held = FileLock::try_lock(&path).unwrap().unwrap();

        let waiter = {
            let path = path.clone();
            tokio::spawn(async move {
                FileLock::acquire(&path, Duration::from_secs(5), Duration::from_millis(20)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        let lock = waiter.await.unwrap().unwrap();
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    fn test_try_lock_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing").join("repositories.lock");
        assert!(FileLock::try_lock(&path).is_err());
    }
}
