//! Backend selection from command-line flags.

use async_trait::async_trait;

use crate::consul::ConsulLock;
use crate::error::Result;
use crate::file::FileLock;
use crate::Lock;

/// The lock backend chosen at startup.
#[derive(Debug)]
pub enum LockBackend {
    /// A local lock file.
    File(FileLock),
    /// A Consul KV key.
    Consul(ConsulLock),
}

impl LockBackend {
    /// Pick a backend: Consul when an address is given, otherwise a lock file.
    ///
    /// `name` is the lock file path or the Consul key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be constructed.
    pub fn from_flags(name: &str, consul_address: Option<&str>) -> Result<Self> {
        match consul_address.filter(|address| !address.is_empty()) {
            Some(address) => Ok(Self::Consul(ConsulLock::new(address, name)?)),
            None => Ok(Self::File(FileLock::new(name)?)),
        }
    }
}

#[async_trait]
impl Lock for LockBackend {
    async fn try_acquire(&self) -> Result<()> {
        match self {
            Self::File(lock) => lock.try_acquire().await,
            Self::Consul(lock) => lock.try_acquire().await,
        }
    }

    async fn release(&self) -> Result<()> {
        match self {
            Self::File(lock) => lock.release().await,
            Self::Consul(lock) => lock.release().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consul_address_selects_consul() {
        let backend = LockBackend::from_flags("locks/run", Some("localhost:8500")).unwrap();
        assert!(matches!(backend, LockBackend::Consul(_)));
    }

    #[test]
    fn no_address_selects_file() {
        let backend = LockBackend::from_flags("run.lock", None).unwrap();
        assert!(matches!(backend, LockBackend::File(_)));

        let backend = LockBackend::from_flags("run.lock", Some("")).unwrap();
        assert!(matches!(backend, LockBackend::File(_)));
    }

    #[tokio::test]
    async fn delegates_to_file_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.lock");
        let backend = LockBackend::from_flags(path.to_str().unwrap(), None).unwrap();

        backend.try_acquire().await.unwrap();
        assert!(path.exists());
        backend.release().await.unwrap();
        assert!(!path.exists());
    }
}
