//! Try-once locks that serialize flowrunner invocations.
//!
//! A lock guards a cluster against concurrent step submissions from separate
//! CLI processes. Acquisition never waits: a contested lock is reported as
//! [`LockError::Held`] straight away.
//!
//! ```text
//!                ┌──────────────┐
//!                │ LockBackend  │  selected from --lock/--softLock + --consul
//!                └──────┬───────┘
//!           ┌───────────┴────────────┐
//!           ▼                        ▼
//!   ┌──────────────┐        ┌─────────────────┐
//!   │  FileLock    │        │   ConsulLock    │
//!   │ (pid file)   │        │ (session + KV)  │
//!   └──────────────┘        └─────────────────┘
//! ```
//!
//! Release timing is decided by a [`ReleasePolicy`]: a hard lock is only
//! released when the guarded operation succeeded, a soft lock always.
//!
//! # Example
//!
//! ```no_run
//! use flowrunner_lock::{Lock, LockBackend, ReleasePolicy};
//!
//! # async fn example() -> Result<(), flowrunner_lock::LockError> {
//! let lock = LockBackend::from_flags("/tmp/flowrunner.lock", None)?;
//! lock.try_acquire().await?;
//!
//! let succeeded = true; // run the guarded operation here
//!
//! if ReleasePolicy::OnSuccess.should_release(succeeded) {
//!     lock.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod consul;
pub mod error;
pub mod file;

pub use backend::LockBackend;
pub use consul::ConsulLock;
pub use error::{LockError, Result};
pub use file::FileLock;

use async_trait::async_trait;

/// A mutual-exclusion capability shared between processes.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Acquire the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Held` if another holder owns the lock, or a
    /// transport error if the backend cannot be reached.
    async fn try_acquire(&self) -> Result<()>;

    /// Release a lock held by this process.
    ///
    /// # Errors
    ///
    /// Returns `LockError::NotHeld` if this process does not hold the lock.
    async fn release(&self) -> Result<()>;
}

/// When a lock taken around an operation is given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Release only after a successful operation; a failure leaves the lock
    /// held until an operator clears it.
    OnSuccess,
    /// Release regardless of the outcome.
    Always,
}

impl ReleasePolicy {
    /// Whether the lock should be released after an operation.
    #[must_use]
    pub const fn should_release(self, succeeded: bool) -> bool {
        match self {
            Self::OnSuccess => succeeded,
            Self::Always => true,
        }
    }
}
