//! Error types for cluster control.
//!
//! This module defines all errors that can occur while building requests,
//! launching and tearing down clusters, running steps and retrieving logs.

use flowrunner_core::StepId;
use thiserror::Error;

use crate::types::ClusterState;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in cluster control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Both placement modes were configured.
    #[error("Only one of Availability Zone and Subnet id should be provided")]
    LocationConflict,

    /// Neither placement mode was configured.
    #[error("At least one of Availability Zone and Subnet id is required")]
    LocationMissing,

    /// An application outside the allow-set was requested.
    #[error("Only Hadoop, Hive, Mahout, Pig, Spark are allowed applications")]
    UnsupportedApplication(String),

    /// The platform version does not start with a digit.
    #[error("invalid platform version '{0}': the first character must be a digit")]
    InvalidVersion(String),

    /// The playbook has no steps.
    #[error("No steps found in config, nothing to add")]
    NoSteps,

    /// A step requested a failure action other than the two allowed ones.
    #[error(
        "Only the following failure actions are allowed 'CANCEL_AND_WAIT, CONTINUE' - to terminate use the 'down' command"
    )]
    DisallowedFailureAction(String),

    /// The credential selector pair could not be resolved.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] flowrunner_core::CoreError),

    /// A call to the remote cluster or storage API failed.
    #[error("remote API error: {0}")]
    Remote(String),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every launch attempt ended in a bootstrap failure.
    #[error("could not start the cluster due to bootstrap failure")]
    BootstrapFailure {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The cluster settled in a state other than ready.
    #[error("EMR cluster failed to launch with state {state}")]
    LaunchFailed {
        /// The state the cluster ended in.
        state: ClusterState,
    },

    /// One or more steps failed or were cancelled.
    #[error("{failed}/{total} steps failed to complete successfully")]
    StepsFailed {
        /// Number of failed or cancelled steps.
        failed: usize,
        /// Number of steps submitted.
        total: usize,
        /// Steps that genuinely failed; cancelled steps are not included.
        failed_step_ids: Vec<StepId>,
    },

    /// The cluster has no log location configured.
    #[error("LogUri cannot be empty for the logs to be retrieved")]
    EmptyLogUri,

    /// The cluster's log location could not be parsed.
    #[error("couldn't parse LogUri '{uri}': {reason}")]
    InvalidLogUri {
        /// The raw log URI.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A stage of log retrieval failed.
    #[error("{stage}: {source}")]
    LogRetrieval {
        /// The stage that failed.
        stage: &'static str,
        /// The underlying error.
        #[source]
        source: Box<ControlError>,
    },
}

impl ControlError {
    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Io(_))
    }

    /// Step ids that genuinely failed, if this is an aggregate step failure.
    #[must_use]
    pub fn failed_step_ids(&self) -> &[StepId] {
        match self {
            Self::StepsFailed {
                failed_step_ids, ..
            } => failed_step_ids,
            _ => &[],
        }
    }

    /// Wrap an error with the log retrieval stage it happened in.
    pub(crate) fn during(stage: &'static str) -> impl FnOnce(Self) -> Self {
        move |source| Self::LogRetrieval {
            stage,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_failure_message() {
        let err = ControlError::StepsFailed {
            failed: 2,
            total: 5,
            failed_step_ids: vec![StepId::new("s-1").unwrap()],
        };
        assert_eq!(err.to_string(), "2/5 steps failed to complete successfully");
        assert_eq!(err.failed_step_ids().len(), 1);
        assert!(ControlError::NoSteps.failed_step_ids().is_empty());
    }

    #[test]
    fn retriable_errors() {
        assert!(ControlError::Remote("throttled".into()).is_retriable());
        assert!(!ControlError::LocationMissing.is_retriable());
        assert!(!ControlError::BootstrapFailure { attempts: 3 }.is_retriable());
    }

    #[test]
    fn stage_context_is_prefixed() {
        let err = ControlError::during("couldn't download step logs")(ControlError::Remote(
            "access denied".into(),
        ));
        assert_eq!(
            err.to_string(),
            "couldn't download step logs: remote API error: access denied"
        );
    }
}
