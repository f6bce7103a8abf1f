//! Cluster launch and teardown.
//!
//! Launching submits a creation request and polls until the cluster settles.
//! A cluster that dies during bootstrap is relaunched after a randomized
//! delay, up to the configured number of attempts.

use std::sync::Arc;
use std::time::Duration;

use flowrunner_core::{ClusterConfig, ClusterHandle};
use rand::Rng;

use crate::api::ClusterApi;
use crate::error::{ControlError, Result};
use crate::lifecycle::{self, LAUNCH_EXIT_STATES, TEARDOWN_EXIT_STATES};
use crate::request::build_launch_request;
use crate::types::{ClusterDescription, ClusterState, ControlConfig};

/// Launches clusters and tears them down.
pub struct ClusterLauncher<C: ClusterApi> {
    api: Arc<C>,
    config: ControlConfig,
}

impl<C: ClusterApi> ClusterLauncher<C> {
    /// Create a new launcher.
    #[must_use]
    pub fn new(api: Arc<C>, config: ControlConfig) -> Self {
        Self { api, config }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(api: Arc<C>) -> Self {
        Self::new(api, ControlConfig::default())
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Launch a cluster and wait until it is ready to accept steps.
    ///
    /// # Errors
    ///
    /// Returns a request-building error before any remote call is made.
    /// Returns `ControlError::BootstrapFailure` if every attempt died during
    /// bootstrap, and `ControlError::LaunchFailed` if the cluster settled in
    /// any other non-ready state.
    pub async fn launch(&self, cluster: &ClusterConfig) -> Result<ClusterHandle> {
        let request = build_launch_request(cluster)?;
        let attempts = self.config.bootstrap_retry_attempts.max(1);

        for attempt in 1..=attempts {
            tracing::info!(
                name = %request.name,
                attempt,
                attempts,
                "Launching EMR cluster with name '{}'...",
                request.name
            );
            let handle = self.api.run_job_flow(&request).await?;
            let status = self.wait_for_state(&handle, LAUNCH_EXIT_STATES).await?;

            if status.is_bootstrap_failure() {
                if attempt < attempts {
                    let delay = backoff_delay(self.config.bootstrap_backoff_max_secs);
                    tracing::warn!(
                        cluster = %handle,
                        attempt,
                        "Bootstrap failure detected, retrying in {} seconds...",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            if lifecycle::is_ready(&status.state) {
                tracing::info!(cluster = %handle, "EMR cluster is ready");
                return Ok(handle);
            }
            return Err(ControlError::LaunchFailed {
                state: status.state,
            });
        }

        tracing::error!(attempts, "Every launch attempt ended in a bootstrap failure");
        Err(ControlError::BootstrapFailure { attempts })
    }

    /// Poll a cluster until it reaches one of `exit_states`.
    ///
    /// The first entry of `exit_states` is the state reported as needed in
    /// the progress log.
    ///
    /// # Errors
    ///
    /// Returns an error if a status call fails.
    pub async fn wait_for_state(
        &self,
        cluster: &ClusterHandle,
        exit_states: &[ClusterState],
    ) -> Result<ClusterDescription> {
        let needed = exit_states.first().map_or("", ClusterState::as_str);

        loop {
            let status = self.api.describe_cluster(cluster).await?;
            if exit_states.contains(&status.state) {
                tracing::debug!(cluster = %cluster, state = %status.state, "EMR cluster settled");
                return Ok(status);
            }

            tracing::info!(
                cluster = %cluster,
                state = %status.state,
                "EMR cluster is in state {} - need state {}, checking again in {} seconds...",
                status.state,
                needed,
                self.config.cluster_poll_interval.as_secs()
            );
            tokio::time::sleep(self.config.cluster_poll_interval).await;
        }
    }

    /// Terminate a cluster and wait until it has shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the termination request or a status call fails.
    pub async fn terminate(&self, cluster: &ClusterHandle) -> Result<()> {
        tracing::info!(cluster = %cluster, "Terminating EMR cluster with jobflow id '{cluster}'...");
        self.api.terminate(cluster).await?;

        let status = self.wait_for_state(cluster, TEARDOWN_EXIT_STATES).await?;
        if status.state == ClusterState::TerminatedWithErrors {
            tracing::warn!(cluster = %cluster, "EMR cluster terminated with errors");
        }
        Ok(())
    }
}

/// Pick a random delay in `[0, max_secs)` seconds.
fn backoff_delay(max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::thread_rng().gen_range(0..max_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cluster_status, MockClusterApi};
    use crate::request::fixtures;
    use crate::types::BOOTSTRAP_FAILURE_CODE;

    fn bootstrap_failed() -> ClusterDescription {
        ClusterDescription {
            state: ClusterState::Terminated,
            state_change_reason: Some(BOOTSTRAP_FAILURE_CODE.to_string()),
            log_uri: None,
        }
    }

    fn launcher(api: &Arc<MockClusterApi>) -> ClusterLauncher<MockClusterApi> {
        ClusterLauncher::with_defaults(Arc::clone(api))
    }

    #[tokio::test(start_paused = true)]
    async fn launch_waits_until_ready() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![
            cluster_status(ClusterState::Starting),
            cluster_status(ClusterState::Bootstrapping),
            cluster_status(ClusterState::Waiting),
        ]);

        let started = tokio::time::Instant::now();
        let handle = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap();

        assert_eq!(handle.as_str(), "j-MOCK00000001");
        assert_eq!(api.launches().len(), 1);
        assert_eq!(api.describe_cluster_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_failure_is_retried_until_exhausted() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![
            cluster_status(ClusterState::Bootstrapping),
            bootstrap_failed(),
        ]);

        let err = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::BootstrapFailure { attempts: 3 }));
        assert_eq!(
            err.to_string(),
            "could not start the cluster due to bootstrap failure"
        );
        assert_eq!(api.launches().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_failure_then_success() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![bootstrap_failed()]);

        let config = ControlConfig {
            bootstrap_backoff_max_secs: 0,
            ..ControlConfig::default()
        };
        let launcher = ClusterLauncher::new(Arc::clone(&api), config);

        let cluster = fixtures::cluster(1, 0, "", "4.5.0");
        assert!(launcher.launch(&cluster).await.is_err());

        // The second launch sees a healthy cluster.
        api.set_launch_script(vec![cluster_status(ClusterState::Waiting)]);
        let handle = launcher.launch(&cluster).await.unwrap();
        assert_eq!(handle.as_str(), "j-MOCK00000004");
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_has_no_backoff() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![bootstrap_failed()]);

        let config = ControlConfig {
            bootstrap_retry_attempts: 1,
            ..ControlConfig::default()
        };
        let started = tokio::time::Instant::now();
        let err = ClusterLauncher::new(Arc::clone(&api), config)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::BootstrapFailure { attempts: 1 }));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn non_bootstrap_termination_fails_launch() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![
            cluster_status(ClusterState::Starting),
            cluster_status(ClusterState::TerminatedWithErrors),
        ]);

        let err = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "EMR cluster failed to launch with state TERMINATED_WITH_ERRORS"
        );
        assert_eq!(api.launches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminating_during_launch_fails() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![cluster_status(ClusterState::Terminating)]);

        let err = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::LaunchFailed {
                state: ClusterState::Terminating
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_makes_no_remote_call() {
        let api = Arc::new(MockClusterApi::new());
        let err = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "x.5.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::InvalidVersion(_)));
        assert!(api.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_errors_are_not_retried() {
        let api = Arc::new(MockClusterApi::new());
        api.set_launch_script(vec![cluster_status(ClusterState::Waiting)]);
        api.fail_next("run_job_flow", "access denied");

        let err = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Remote(_)));
        assert!(api.launches().is_empty());

        api.fail_next("describe_cluster", "throttled");
        let err = launcher(&api)
            .launch(&fixtures::cluster(1, 0, "", "4.5.0"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "remote API error: throttled");
        assert_eq!(api.launches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_waits_for_shutdown() {
        let api = Arc::new(MockClusterApi::new());
        let handle = ClusterHandle::new("j-123").unwrap();
        api.script_cluster(
            &handle,
            vec![
                cluster_status(ClusterState::Terminating),
                cluster_status(ClusterState::Terminating),
                cluster_status(ClusterState::Terminated),
            ],
        );

        launcher(&api).terminate(&handle).await.unwrap();

        assert_eq!(api.terminated(), vec![handle]);
        assert_eq!(api.describe_cluster_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_with_errors_still_succeeds() {
        let api = Arc::new(MockClusterApi::new());
        let handle = ClusterHandle::new("j-123").unwrap();
        api.script_cluster(
            &handle,
            vec![cluster_status(ClusterState::TerminatedWithErrors)],
        );

        assert!(launcher(&api).terminate(&handle).await.is_ok());
    }

    #[test]
    fn backoff_stays_in_range() {
        assert_eq!(backoff_delay(0), Duration::ZERO);
        for _ in 0..100 {
            assert!(backoff_delay(5) < Duration::from_secs(5));
        }
    }
}
