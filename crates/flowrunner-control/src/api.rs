//! Remote API capabilities consumed by the engine.
//!
//! These traits abstract the cluster control API and the object storage API,
//! allowing for mock implementations in tests.

use std::path::Path;

use async_trait::async_trait;
use flowrunner_core::{ClusterHandle, StepId};

use crate::error::Result;
use crate::request::{LaunchRequest, StepRequest};
use crate::types::{ClusterDescription, ObjectPage, StepDescription};

/// Operations on the remote cluster control API.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a cluster creation request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected or the call fails.
    async fn run_job_flow(&self, request: &LaunchRequest) -> Result<ClusterHandle>;

    /// Fetch the current state, state-change reason and log location of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the cluster is unknown.
    async fn describe_cluster(&self, cluster: &ClusterHandle) -> Result<ClusterDescription>;

    /// Request termination of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn terminate(&self, cluster: &ClusterHandle) -> Result<()>;

    /// Submit a batch of steps, returning their ids in submission order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected or the call fails.
    async fn add_steps(&self, request: &StepRequest) -> Result<Vec<StepId>>;

    /// Fetch the description of one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the step is unknown.
    async fn describe_step(&self, cluster: &ClusterHandle, step: &StepId)
        -> Result<StepDescription>;

    /// List the ids of every step known to a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn list_steps(&self, cluster: &ClusterHandle) -> Result<Vec<StepId>>;
}

/// Operations on the remote object storage API.
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Fetch one page of object keys under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage>;

    /// Download one object to `dest`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the file cannot be written.
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<()>;
}
