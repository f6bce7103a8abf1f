//! Step submission and completion tracking.
//!
//! A batch of steps is submitted in one request. In blocking mode the runner
//! then polls every step each round, logging only status lines that were not
//! already logged in the previous round, until every step has finished.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowrunner_core::{ClusterHandle, PlaybookConfig, StepId};
use tracing::Level;

use crate::api::ClusterApi;
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::request::build_step_request;
use crate::types::{ControlConfig, StepDescription, StepOutcome, StepState};

/// Status lines logged in the previous polling round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLogHistory {
    info: Vec<String>,
    error: Vec<String>,
}

impl StepLogHistory {
    /// Record this round's lines, returning the ones not seen last round.
    pub fn record(&mut self, info: Vec<String>, error: Vec<String>) -> (Vec<String>, Vec<String>) {
        let new_info = unseen(&self.info, &info);
        let new_error = unseen(&self.error, &error);
        self.info = info;
        self.error = error;
        (new_info, new_error)
    }
}

fn unseen(previous: &[String], current: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|line| !previous.contains(line))
        .cloned()
        .collect()
}

/// Tally of one polling round.
#[derive(Debug, Default)]
struct Round {
    succeeded: usize,
    errored: usize,
    failed_ids: Vec<StepId>,
    info: Vec<String>,
    error: Vec<String>,
}

/// Submits steps to a cluster and tracks them to completion.
pub struct StepRunner<C: ClusterApi> {
    api: Arc<C>,
    config: ControlConfig,
}

impl<C: ClusterApi> StepRunner<C> {
    /// Create a new step runner.
    #[must_use]
    pub fn new(api: Arc<C>, config: ControlConfig) -> Self {
        Self { api, config }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(api: Arc<C>) -> Self {
        Self::new(api, ControlConfig::default())
    }

    /// Submit every step of a playbook, returning the new step ids.
    ///
    /// With `blocking` set, waits until every step has finished.
    ///
    /// # Errors
    ///
    /// Returns a request-building error before any remote call is made.
    /// In blocking mode, returns `ControlError::StepsFailed` if any step
    /// failed or was cancelled.
    pub async fn submit(
        &self,
        playbook: &PlaybookConfig,
        cluster: &ClusterHandle,
        blocking: bool,
    ) -> Result<Vec<StepId>> {
        let request = build_step_request(playbook, cluster)?;
        let ids = self.api.add_steps(&request).await?;
        tracing::info!(
            cluster = %cluster,
            count = ids.len(),
            "Successfully added {} steps to the EMR cluster with jobflow id '{cluster}'...",
            ids.len()
        );

        if blocking {
            self.await_completion(cluster, &ids).await?;
        }
        Ok(ids)
    }

    /// Poll the given steps until every one has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if a status call fails, and
    /// `ControlError::StepsFailed` if any step failed or was cancelled.
    pub async fn await_completion(&self, cluster: &ClusterHandle, steps: &[StepId]) -> Result<()> {
        self.await_reporting(cluster, steps, |level, line| {
            if level == Level::ERROR {
                tracing::error!(cluster = %cluster, "{line}");
            } else {
                tracing::info!(cluster = %cluster, "{line}");
            }
        })
        .await
    }

    async fn await_reporting<F>(
        &self,
        cluster: &ClusterHandle,
        steps: &[StepId],
        mut report: F,
    ) -> Result<()>
    where
        F: FnMut(Level, &str),
    {
        let mut history = StepLogHistory::default();

        loop {
            let round = self.poll_round(cluster, steps).await?;

            let (info, error) = history.record(round.info, round.error);
            for line in &info {
                report(Level::INFO, line);
            }
            for line in &error {
                report(Level::ERROR, line);
            }

            if round.succeeded + round.errored == steps.len() {
                if round.errored == 0 {
                    return Ok(());
                }
                return Err(ControlError::StepsFailed {
                    failed: round.errored,
                    total: steps.len(),
                    failed_step_ids: round.failed_ids,
                });
            }

            tokio::time::sleep(self.config.step_poll_interval).await;
        }
    }

    /// List every step id known to a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing call fails.
    pub async fn step_ids(&self, cluster: &ClusterHandle) -> Result<Vec<StepId>> {
        self.api.list_steps(cluster).await
    }

    /// Fetch the state of one step along with its status lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the status call fails.
    pub async fn retrieve_step_state(
        &self,
        cluster: &ClusterHandle,
        step: &StepId,
    ) -> Result<(StepState, Vec<String>)> {
        let description = self
            .api
            .describe_step(cluster, step)
            .await
            .map_err(|err| match err {
                ControlError::Remote(msg) => {
                    ControlError::Remote(format!("couldn't retrieve step {step} state: {msg}"))
                }
                other => other,
            })?;

        let lines = status_line(&description).into_iter().collect();
        Ok((description.state, lines))
    }

    async fn poll_round(&self, cluster: &ClusterHandle, steps: &[StepId]) -> Result<Round> {
        let mut round = Round::default();

        for step in steps {
            let (state, lines) = self.retrieve_step_state(cluster, step).await?;
            match lifecycle::step_outcome(&state) {
                StepOutcome::Succeeded => {
                    round.succeeded += 1;
                    round.info.extend(lines);
                }
                StepOutcome::Failed => {
                    round.errored += 1;
                    round.failed_ids.push(step.clone());
                    round.error.extend(lines);
                }
                StepOutcome::Cancelled => {
                    round.errored += 1;
                    round.error.extend(lines);
                }
                StepOutcome::Undecided => {}
            }
        }

        Ok(round)
    }
}

/// The status line for a finished step, `None` while it is still going.
fn status_line(step: &StepDescription) -> Option<String> {
    let suffix = timing(step.started_at, step.ended_at);
    match lifecycle::step_outcome(&step.state) {
        StepOutcome::Succeeded => Some(format!(
            "Step '{}' with id '{}' completed successfully{suffix}",
            step.name, step.id
        )),
        StepOutcome::Failed | StepOutcome::Cancelled => Some(format!(
            "Step '{}' with id '{}' was {}{suffix}",
            step.name, step.id, step.state
        )),
        StepOutcome::Undecided => None,
    }
}

fn timing(started: Option<DateTime<Utc>>, ended: Option<DateTime<Utc>>) -> String {
    match (started, ended) {
        (Some(start), Some(end)) => format!(
            " (started {}, ended {})",
            start.to_rfc3339(),
            end.to_rfc3339()
        ),
        (Some(start), None) => format!(" (started {})", start.to_rfc3339()),
        _ => String::new(),
    }
}
