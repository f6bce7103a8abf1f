//! Cluster lifecycle, step execution and log retrieval for flowrunner.
//!
//! This crate turns validated cluster and playbook records into remote API
//! requests and drives them to completion by polling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │  ClusterLauncher │  │    StepRunner    │  │   LogRetriever   │
//! │  launch/teardown │  │  submit + poll   │  │  fetch + gunzip  │
//! └────────┬─────────┘  └────────┬─────────┘  └────┬────────┬────┘
//!          │                     │                 │        │
//!          └──────────┬──────────┴─────────────────┘        │
//!                     ▼                                     ▼
//!             ┌──────────────┐                      ┌──────────────┐
//!             │  ClusterApi  │                      │  StorageApi  │
//!             │    (EMR)     │                      │     (S3)     │
//!             └──────────────┘                      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowrunner_control::{AwsClusterApi, ClusterLauncher, StepRunner};
//! use flowrunner_core::{ClusterConfig, PlaybookConfig};
//!
//! # async fn example(cluster: ClusterConfig, playbook: PlaybookConfig)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = cluster.credentials.resolve()?;
//! let api = Arc::new(AwsClusterApi::connect(&cluster.region, &credentials).await);
//!
//! let handle = ClusterLauncher::with_defaults(Arc::clone(&api))
//!     .launch(&cluster)
//!     .await?;
//! StepRunner::with_defaults(api).submit(&playbook, &handle, true).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod aws;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod logs;
pub mod request;
pub mod steps;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use api::{ClusterApi, StorageApi};
pub use aws::{load_sdk_config, AwsClusterApi, AwsStorageApi};
pub use error::{ControlError, Result};
pub use launcher::ClusterLauncher;
pub use logs::{LogLocation, LogRetriever};
pub use request::{build_launch_request, build_step_request, LaunchRequest, StepRequest};
pub use steps::{StepLogHistory, StepRunner};
pub use types::{
    ActionOnFailure, ClusterDescription, ClusterState, ControlConfig, StepDescription, StepState,
};
