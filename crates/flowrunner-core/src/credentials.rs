//! Credential selector resolution.
//!
//! Records carry two strings, an access key id and a secret access key. Two
//! sentinel values select a credential source instead of literal keys:
//! `iam` (instance-role credentials) and `env` (environment variables). A pair
//! must select exactly one source; mixing a sentinel with a literal key is
//! rejected.

use crate::error::{CoreError, Result};

const ROLE_SENTINEL: &str = "iam";
const ENV_SENTINEL: &str = "env";

/// Where the remote API clients obtain their credentials from.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialsMode {
    /// Instance-role credentials served by the metadata endpoint.
    Role,
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` from the environment.
    Env,
    /// Literal keys taken from the record.
    Static {
        /// The access key id.
        access_key_id: String,
        /// The secret access key.
        secret_access_key: String,
    },
}

impl CredentialsMode {
    /// Resolve a selector pair into a credentials mode.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MixedCredentials` if only one of the two values is
    /// a sentinel.
    pub fn resolve(access_key_id: &str, secret_access_key: &str) -> Result<Self> {
        match (access_key_id, secret_access_key) {
            (ROLE_SENTINEL, ROLE_SENTINEL) => Ok(Self::Role),
            (ROLE_SENTINEL, _) | (_, ROLE_SENTINEL) => {
                Err(CoreError::MixedCredentials(ROLE_SENTINEL))
            }
            (ENV_SENTINEL, ENV_SENTINEL) => Ok(Self::Env),
            (ENV_SENTINEL, _) | (_, ENV_SENTINEL) => Err(CoreError::MixedCredentials(ENV_SENTINEL)),
            _ => Ok(Self::Static {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for CredentialsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role => f.write_str("Role"),
            Self::Env => f.write_str("Env"),
            Self::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_each_mode() {
        assert_eq!(CredentialsMode::resolve("iam", "iam").unwrap(), CredentialsMode::Role);
        assert_eq!(
            CredentialsMode::resolve("env", "env").unwrap(),
            CredentialsMode::Env
        );
        assert_eq!(
            CredentialsMode::resolve("AKIA123", "secret").unwrap(),
            CredentialsMode::Static {
                access_key_id: "AKIA123".to_string(),
                secret_access_key: "secret".to_string(),
            }
        );
    }

    #[test]
    fn rejects_mixed_modes() {
        let err = CredentialsMode::resolve("iam", "secret").unwrap_err();
        assert_eq!(
            err.to_string(),
            "access-key and secret-key must both be set to 'iam', or neither"
        );

        let err = CredentialsMode::resolve("env", "nv").unwrap_err();
        assert_eq!(
            err.to_string(),
            "access-key and secret-key must both be set to 'env', or neither"
        );

        assert!(CredentialsMode::resolve("iam", "env").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let mode = CredentialsMode::resolve("AKIA123", "hunter2").unwrap();
        let rendered = format!("{mode:?}");
        assert!(rendered.contains("AKIA123"));
        assert!(!rendered.contains("hunter2"));
    }
}
