//! Lock error types.

use thiserror::Error;

/// A result type using `LockError`.
pub type Result<T> = std::result::Result<T, LockError>;

/// Errors that can occur while acquiring or releasing a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder owns the lock.
    #[error("lock '{0}' is held by another process")]
    Held(String),

    /// This process does not hold the lock it tried to release.
    #[error("lock '{0}' is not held by this process")]
    NotHeld(String),

    /// The lock file could not be read or written.
    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),

    /// The Consul agent rejected a request or could not be reached.
    #[error("consul error: {0}")]
    Consul(String),
}

impl LockError {
    /// Whether this error means the lock is contended.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Held(_))
    }
}
