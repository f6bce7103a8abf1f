//! Core types for flowrunner.
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace:
//!
//! - **Identifiers**: [`ClusterHandle`] and [`StepId`], the opaque strings the
//!   remote control API hands back
//! - **Declarative records**: [`ClusterConfig`] and [`PlaybookConfig`], the
//!   decoded form of the templated configuration files
//! - **Credentials**: [`CredentialsMode`], the resolved form of the
//!   access-key / secret-key selector pair
//!
//! # Example
//!
//! ```
//! use flowrunner_core::{ClusterHandle, CredentialsMode};
//!
//! let handle: ClusterHandle = "j-2AXXXXXXGAPLF".parse().unwrap();
//! assert_eq!(handle.as_str(), "j-2AXXXXXXGAPLF");
//!
//! let mode = CredentialsMode::resolve("env", "env").unwrap();
//! assert_eq!(mode, CredentialsMode::Env);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod credentials;
pub mod error;
pub mod ids;
pub mod records;

pub use credentials::CredentialsMode;
pub use error::{CoreError, Result};
pub use ids::{ClusterHandle, IdError, StepId};
pub use records::{
    BootstrapActionConfig, ClassicLocation, ClusterConfig, CredentialsConfig,
    EbsBlockDeviceConfig, EbsConfiguration, Ec2Config, InstanceGroupSpec, InstancesConfig,
    LocationConfig, MasterInstanceSpec, PlaybookConfig, RolesConfig, ScriptBootstrapAction,
    SoftwareConfiguration, StepConfig, TagConfig, VolumeSpecification, VpcLocation,
    ALLOWED_APPLICATIONS,
};
