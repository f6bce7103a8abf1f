//! Cluster and step state classification.
//!
//! The engine never drives state itself; it only observes the states the
//! remote service reports and decides when to stop polling.
//!
//! # Cluster
//!
//! ```text
//!   STARTING ──► BOOTSTRAPPING ──► RUNNING ◄──► WAITING
//!       │              │              │            │
//!       └──────────────┴──────┬───────┴────────────┘
//!                             ▼
//!                        TERMINATING
//!                             │
//!                ┌────────────┴────────────┐
//!                ▼                         ▼
//!           TERMINATED           TERMINATED_WITH_ERRORS
//! ```
//!
//! # Step
//!
//! ```text
//!   PENDING ──► RUNNING ──┬──► COMPLETED
//!      │                  ├──► FAILED
//!      └──────────────────┴──► CANCELLED
//! ```

use crate::types::{ClusterState, StepOutcome, StepState};

/// States that end the launch polling loop.
pub const LAUNCH_EXIT_STATES: &[ClusterState] = &[
    ClusterState::Waiting,
    ClusterState::Terminating,
    ClusterState::Terminated,
    ClusterState::TerminatedWithErrors,
];

/// States that end the teardown polling loop.
pub const TEARDOWN_EXIT_STATES: &[ClusterState] =
    &[ClusterState::Terminated, ClusterState::TerminatedWithErrors];

/// Returns true if the cluster is ready to accept steps.
#[must_use]
pub const fn is_ready(state: &ClusterState) -> bool {
    matches!(state, ClusterState::Waiting)
}

/// Returns true if the cluster has shut down for good.
#[must_use]
pub const fn is_terminated(state: &ClusterState) -> bool {
    matches!(
        state,
        ClusterState::Terminated | ClusterState::TerminatedWithErrors
    )
}

/// Classify a polled step state.
#[must_use]
pub const fn step_outcome(state: &StepState) -> StepOutcome {
    match state {
        StepState::Completed => StepOutcome::Succeeded,
        StepState::Failed => StepOutcome::Failed,
        StepState::Cancelled => StepOutcome::Cancelled,
        StepState::Pending
        | StepState::CancelPending
        | StepState::Running
        | StepState::Interrupted
        | StepState::Unknown(_) => StepOutcome::Undecided,
    }
}

/// Returns true if the step will not change state again.
#[must_use]
pub const fn is_step_terminal(state: &StepState) -> bool {
    !matches!(step_outcome(state), StepOutcome::Undecided)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_exit_set() {
        assert!(LAUNCH_EXIT_STATES.contains(&ClusterState::Waiting));
        assert!(LAUNCH_EXIT_STATES.contains(&ClusterState::Terminating));
        assert!(!LAUNCH_EXIT_STATES.contains(&ClusterState::Bootstrapping));
        assert!(!LAUNCH_EXIT_STATES.contains(&ClusterState::Running));
    }

    #[test]
    fn teardown_exit_set() {
        assert!(TEARDOWN_EXIT_STATES.iter().all(is_terminated));
        assert!(!TEARDOWN_EXIT_STATES.contains(&ClusterState::Terminating));
    }

    #[test]
    fn only_waiting_is_ready() {
        assert!(is_ready(&ClusterState::Waiting));
        assert!(!is_ready(&ClusterState::Running));
        assert!(!is_ready(&ClusterState::Terminated));
    }

    #[test]
    fn step_classification() {
        use StepState::*;

        assert_eq!(step_outcome(&Completed), StepOutcome::Succeeded);
        assert_eq!(step_outcome(&Failed), StepOutcome::Failed);
        assert_eq!(step_outcome(&Cancelled), StepOutcome::Cancelled);
        for state in [Pending, CancelPending, Running, Interrupted, Unknown("X".into())] {
            assert_eq!(step_outcome(&state), StepOutcome::Undecided);
            assert!(!is_step_terminal(&state));
        }
        assert!(is_step_terminal(&Cancelled));
    }
}
