//! Types shared by the launcher, the step runner and the log retriever.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowrunner_core::StepId;
use serde::Serialize;

use crate::error::{ControlError, Result};

/// State-change reason code reported when a bootstrap action failed.
pub const BOOTSTRAP_FAILURE_CODE: &str = "BOOTSTRAP_FAILURE";

/// Configuration for the control engine.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Delay between cluster status polls.
    pub cluster_poll_interval: Duration,
    /// Delay between step status polls.
    pub step_poll_interval: Duration,
    /// Launch attempts before giving up on repeated bootstrap failures.
    pub bootstrap_retry_attempts: u32,
    /// Upper bound of the randomized delay between launch attempts (seconds).
    pub bootstrap_backoff_max_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cluster_poll_interval: Duration::from_secs(30),
            step_poll_interval: Duration::from_secs(15),
            bootstrap_retry_attempts: 3,
            bootstrap_backoff_max_secs: 300,
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `FLOWRUNNER_CLUSTER_POLL_SECS`: Delay between cluster status polls
    /// - `FLOWRUNNER_STEP_POLL_SECS`: Delay between step status polls
    /// - `FLOWRUNNER_BOOTSTRAP_RETRIES`: Launch attempts on bootstrap failure
    /// - `FLOWRUNNER_BOOTSTRAP_BACKOFF_SECS`: Maximum randomized relaunch delay
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FLOWRUNNER_CLUSTER_POLL_SECS") {
            if let Ok(n) = val.parse() {
                config.cluster_poll_interval = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("FLOWRUNNER_STEP_POLL_SECS") {
            if let Ok(n) = val.parse() {
                config.step_poll_interval = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("FLOWRUNNER_BOOTSTRAP_RETRIES") {
            if let Ok(n) = val.parse() {
                config.bootstrap_retry_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("FLOWRUNNER_BOOTSTRAP_BACKOFF_SECS") {
            if let Ok(n) = val.parse() {
                config.bootstrap_backoff_max_secs = n;
            }
        }

        config
    }
}

/// Cluster state as reported by the control API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClusterState {
    /// Instances are being provisioned.
    Starting,
    /// Bootstrap actions are running.
    Bootstrapping,
    /// A step is running.
    Running,
    /// Ready and idle, accepting steps.
    Waiting,
    /// Shutting down.
    Terminating,
    /// Shut down normally.
    Terminated,
    /// Shut down after an error.
    TerminatedWithErrors,
    /// A state this client does not know about.
    Unknown(String),
}

impl ClusterState {
    /// Parse the wire representation of a state.
    #[must_use]
    pub fn from_remote(state: &str) -> Self {
        match state {
            "STARTING" => Self::Starting,
            "BOOTSTRAPPING" => Self::Bootstrapping,
            "RUNNING" => Self::Running,
            "WAITING" => Self::Waiting,
            "TERMINATING" => Self::Terminating,
            "TERMINATED" => Self::Terminated,
            "TERMINATED_WITH_ERRORS" => Self::TerminatedWithErrors,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The wire representation of this state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Starting => "STARTING",
            Self::Bootstrapping => "BOOTSTRAPPING",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::TerminatedWithErrors => "TERMINATED_WITH_ERRORS",
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step state as reported by the control API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepState {
    /// Queued behind other steps.
    Pending,
    /// Cancellation requested but not yet applied.
    CancelPending,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Cancelled, usually because an earlier step failed.
    Cancelled,
    /// Finished with an error.
    Failed,
    /// Interrupted by the cluster shutting down.
    Interrupted,
    /// A state this client does not know about.
    Unknown(String),
}

impl StepState {
    /// Parse the wire representation of a state.
    #[must_use]
    pub fn from_remote(state: &str) -> Self {
        match state {
            "PENDING" => Self::Pending,
            "CANCEL_PENDING" => Self::CancelPending,
            "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "CANCELLED" => Self::Cancelled,
            "FAILED" => Self::Failed,
            "INTERRUPTED" => Self::Interrupted,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The wire representation of this state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::CancelPending => "CANCEL_PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a polled step counts toward the batch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not decided yet; polled again next round.
    Undecided,
    /// Completed successfully.
    Succeeded,
    /// Failed; reported in the failed-step list.
    Failed,
    /// Cancelled; counts as an error but is not reported as failed.
    Cancelled,
}

/// What the cluster does with later steps when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionOnFailure {
    /// Cancel the remaining steps and keep the cluster waiting.
    #[serde(rename = "CANCEL_AND_WAIT")]
    CancelAndWait,
    /// Carry on with the next step.
    #[serde(rename = "CONTINUE")]
    Continue,
}

impl ActionOnFailure {
    /// Parse a playbook value. Terminating the cluster is not allowed here.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DisallowedFailureAction` for any other value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "CANCEL_AND_WAIT" => Ok(Self::CancelAndWait),
            "CONTINUE" => Ok(Self::Continue),
            other => Err(ControlError::DisallowedFailureAction(other.to_string())),
        }
    }

    /// The wire representation of this action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CancelAndWait => "CANCEL_AND_WAIT",
            Self::Continue => "CONTINUE",
        }
    }
}

/// The subset of a cluster description the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescription {
    /// Current state.
    pub state: ClusterState,
    /// Reason code of the last state change, if any.
    pub state_change_reason: Option<String>,
    /// Where the cluster writes its logs.
    pub log_uri: Option<String>,
}

impl ClusterDescription {
    /// Whether the last state change was caused by a bootstrap failure.
    #[must_use]
    pub fn is_bootstrap_failure(&self) -> bool {
        self.state_change_reason.as_deref() == Some(BOOTSTRAP_FAILURE_CODE)
    }
}

/// The subset of a step description the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescription {
    /// Step id.
    pub id: StepId,
    /// Step name from the playbook.
    pub name: String,
    /// Current state.
    pub state: StepState,
    /// When the step started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step finished.
    pub ended_at: Option<DateTime<Utc>>,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Object keys on this page.
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next: Option<String>,
}
