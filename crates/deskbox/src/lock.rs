use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::fcntl::{Flock, FlockArg};
use tracing::trace;

use crate::error::{ProvisionError, Result};

/// Default bound on how long an allocation section may wait for the lock.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between nonblocking acquisition probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Acquire an exclusive flock on `path`, waiting at most `timeout`.
///
/// The returned guard holds the lock until dropped; the OS releases it on
/// process exit regardless. Fails with [`ProvisionError::LockTimeout`] if the
/// lock stays contended past the deadline.
pub async fn acquire(path: &Path, timeout: Duration) -> Result<Flock<File>> {
    let deadline = Instant::now() + timeout;
    loop {
        let file = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                trace!(path = %path.display(), "allocation lock acquired");
                return Ok(lock);
            }
            Err((_file, errno)) => {
                if errno != nix::errno::Errno::EWOULDBLOCK {
                    return Err(std::io::Error::from_raw_os_error(errno as i32).into());
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(ProvisionError::LockTimeout {
                path: path.to_path_buf(),
                timeout,
            });
        }
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.lock");

        let guard = acquire(&path, DEFAULT_TIMEOUT).await.unwrap();
        assert!(path.exists());
        drop(guard);
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.lock");

        let _guard = acquire(&path, DEFAULT_TIMEOUT).await.unwrap();

        let started = Instant::now();
        let err = acquire(&path, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn released_lock_can_be_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.lock");

        let guard = acquire(&path, DEFAULT_TIMEOUT).await.unwrap();
        drop(guard);

        let _again = acquire(&path, Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn waits_for_contended_lock_released_in_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.lock");

        let guard = acquire(&path, DEFAULT_TIMEOUT).await.unwrap();
        let path_clone = path.clone();
        let waiter =
            tokio::spawn(async move { acquire(&path_clone, Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(guard);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn invalid_path_returns_io_error() {
        let err = acquire(Path::new("/nonexistent/dir/ports.lock"), DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
    }
}
