//! Common error types for flowrunner.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while handling declarative records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required field of a record was empty.
    #[error("{0} cannot be empty")]
    MissingField(&'static str),

    /// The access-key / secret-key selector pair mixes credential modes.
    #[error("access-key and secret-key must both be set to '{0}', or neither")]
    MixedCredentials(&'static str),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),
}
