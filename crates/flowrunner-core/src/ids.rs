//! Core identifier types for flowrunner.
//!
//! Both identifiers are opaque strings minted by the remote control API. They
//! are wrapped so that a cluster handle can never be passed where a step id
//! is expected, and so that an empty identifier is rejected at the edge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a launched cluster (an EMR jobflow id such as `j-2AXXXXXXGAPLF`).
///
/// A handle is created by a successful launch call and referenced by every
/// subsequent poll, step submission and termination. It carries no client-side
/// state beyond the identifier itself.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterHandle(String);

/// Identifier of a step submitted to a cluster (such as `s-1XXXXXXXXXXXX`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create an identifier, rejecting empty strings.
            ///
            /// # Errors
            ///
            /// Returns `IdError::Empty` if `value` is empty or only whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdError::Empty(stringify!($name)));
                }
                Ok(Self(value))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(ClusterHandle);
string_id!(StepId);

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input was empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_handle_roundtrip() {
        let handle: ClusterHandle = "j-2AXXXXXXGAPLF".parse().unwrap();
        assert_eq!(handle.as_str(), "j-2AXXXXXXGAPLF");
        assert_eq!(handle.to_string(), "j-2AXXXXXXGAPLF");
        assert_eq!(format!("{handle:?}"), "ClusterHandle(j-2AXXXXXXGAPLF)");
    }

    #[test]
    fn empty_ids_rejected() {
        assert_eq!(
            ClusterHandle::new(""),
            Err(IdError::Empty("ClusterHandle"))
        );
        assert!(StepId::new("   ").is_err());
    }

    #[test]
    fn step_id_serde() {
        let id = StepId::new("s-123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"s-123\"");

        let parsed: StepId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        assert!(serde_json::from_str::<StepId>("\"\"").is_err());
    }
}
