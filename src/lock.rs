//! Serialization of host configuration load/mutate/save cycles
//!
//! Two layers guard a cycle: an async mutex per host configuration path for
//! callers in this process, and an exclusive `flock` on a sibling `.lock`
//! file for parallel test processes sharing the same configuration.

use crate::error::ProvisionError;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// In-process mutexes keyed by host configuration path
fn path_locks() -> &'static DashMap<PathBuf, Arc<Mutex<()>>> {
    static LOCKS: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

/// Path of the lock file guarding a host configuration file
pub fn lock_file_path(config_path: &Path) -> PathBuf {
    let mut name = config_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    config_path.with_file_name(name)
}

/// Held for the duration of one provisioning cycle; releases both layers on drop
pub struct ProvisionGuard {
    _file: FileLock,
    _local: OwnedMutexGuard<()>,
}

impl ProvisionGuard {
    /// Acquire exclusive access to the configuration at `config_path`
    pub async fn acquire(config_path: &Path) -> Result<Self, ProvisionError> {
        let mutex = path_locks()
            .entry(config_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let local = mutex.lock_owned().await;

        let lock_path = lock_file_path(config_path);
        let file = tokio::task::spawn_blocking({
            let lock_path = lock_path.clone();
            move || FileLock::acquire(&lock_path)
        })
        .await
        .map_err(|e| ProvisionError::load(&lock_path, e.to_string()))?
        .map_err(|e| ProvisionError::load(&lock_path, e))?;

        debug!(path = %config_path.display(), "Acquired provisioning lock");

        Ok(Self {
            _file: file,
            _local: local,
        })
    }
}

/// Lock file handle that maintains an exclusive lock
#[cfg(unix)]
struct FileLock {
    _file: std::fs::File,
}

#[cfg(unix)]
impl FileLock {
    fn acquire(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // Blocks until other processes finish their cycle
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }

        // Lock is released when the file handle is closed
        Ok(Self { _file: file })
    }
}

#[cfg(not(unix))]
struct FileLock;

#[cfg(not(unix))]
impl FileLock {
    fn acquire(_path: &Path) -> std::io::Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lock_file_path() {
        assert_eq!(
            lock_file_path(Path::new("/srv/engine/host.config")),
            PathBuf::from("/srv/engine/host.config.lock")
        );
    }

    #[tokio::test]
    async fn test_guard_serializes_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.config");

        let first = ProvisionGuard::acquire(&path).await.unwrap();

        let second_path = path.clone();
        let second = tokio::spawn(async move { ProvisionGuard::acquire(&second_path).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished(), "second guard must wait for the first");

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("second guard acquired after release")
            .unwrap();
        assert!(second.is_ok());
        assert!(lock_file_path(&path).exists());
    }

    #[tokio::test]
    async fn test_guards_on_different_paths_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let _a = ProvisionGuard::acquire(&dir.path().join("a.config")).await.unwrap();
        let b = tokio::time::timeout(
            Duration::from_secs(5),
            ProvisionGuard::acquire(&dir.path().join("b.config")),
        )
        .await;
        assert!(b.is_ok());
    }
}
