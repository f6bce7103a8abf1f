//! Lock materialized as a file holding the owner's process id.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{LockError, Result};
use crate::Lock;

/// A lock file on the local filesystem.
///
/// The file is created exclusively and records the pid of the holder. A
/// lock file left behind by a failed run keeps the lock held until it is
/// removed by hand.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    pid: u32,
}

impl FileLock {
    /// Create a lock at `path`, resolved against the working directory when relative.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be determined.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        Ok(Self {
            path,
            pid: std::process::id(),
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    /// Write our pid into a freshly created lock file.
    ///
    /// A file we created but couldn't fill is removed again.
    async fn record_pid<W: AsyncWrite + Unpin>(&self, mut file: W) -> Result<()> {
        let written = async {
            file.write_all(self.pid.to_string().as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(remove) = tokio::fs::remove_file(&self.path).await {
                tracing::warn!(path = %self.path.display(), error = %remove, "Failed to remove partial lock file");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn recorded_pid(&self) -> Result<Option<u32>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Lock for FileLock {
    async fn try_acquire(&self) -> Result<()> {
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await;

        match created {
            Ok(file) => {
                self.record_pid(file).await?;
                tracing::debug!(path = %self.path.display(), pid = self.pid, "Acquired file lock");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if self.recorded_pid().await? == Some(self.pid) {
                    return Ok(());
                }
                Err(LockError::Held(self.name()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self) -> Result<()> {
        if self.recorded_pid().await? != Some(self.pid) {
            return Err(LockError::NotHeld(self.name()));
        }

        tokio::fs::remove_file(&self.path).await?;
        tracing::debug!(path = %self.path.display(), "Released file lock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn acquire_writes_pid() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("run.lock")).unwrap();

        lock.try_acquire().await.unwrap();

        let contents = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[tokio::test]
    async fn reacquire_by_owner_is_noop() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("run.lock")).unwrap();

        lock.try_acquire().await.unwrap();
        lock.try_acquire().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_lock_is_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");
        std::fs::write(&path, "999999999").unwrap();

        let lock = FileLock::new(&path).unwrap();
        let err = lock.try_acquire().await.unwrap_err();
        assert!(err.is_held());

        let err = lock.release().await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(_)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn release_removes_file() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("run.lock")).unwrap();

        lock.try_acquire().await.unwrap();
        lock.release().await.unwrap();
        assert!(!lock.path().exists());

        let err = lock.release().await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(_)));
    }

    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("no space left on device")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_pid_write_removes_lock_file() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("run.lock")).unwrap();
        std::fs::write(lock.path(), "").unwrap();

        let err = lock.record_pid(FullDisk).await.unwrap_err();
        assert!(matches!(err, LockError::Io(_)));
        assert!(!lock.path().exists());

        lock.try_acquire().await.unwrap();
    }

    #[test]
    fn relative_path_is_made_absolute() {
        let lock = FileLock::new("some.lock").unwrap();
        assert!(lock.path().is_absolute());
        assert!(lock.path().ends_with("some.lock"));
    }
}
