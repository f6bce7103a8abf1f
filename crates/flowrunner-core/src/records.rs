//! Declarative configuration records.
//!
//! These are the typed forms of the `data` section of the two self-describing
//! configuration files: a cluster record (what to launch) and a playbook
//! record (which steps to run). Field names follow the camelCase JSON layout
//! of the files. Unknown fields are rejected so that typos surface early.
//!
//! Structural checks that only need the record itself live here
//! ([`ClusterConfig::validate`], [`PlaybookConfig::validate`]). Checks that
//! belong to building a remote request (placement, application allow-set,
//! failure actions, empty step lists) are performed by the request builders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialsMode;
use crate::error::{CoreError, Result};

/// Applications that may be requested on a cluster.
pub const ALLOWED_APPLICATIONS: [&str; 5] = ["Hadoop", "Hive", "Mahout", "Pig", "Spark"];

/// Declarative description of a cluster to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterConfig {
    /// Cluster name shown in the console.
    pub name: String,
    /// Storage URI the cluster writes its logs to (`s3://bucket/prefix`).
    pub log_uri: String,
    /// Region to launch the cluster in.
    pub region: String,
    /// Credential selector pair.
    pub credentials: CredentialsConfig,
    /// Instance-profile and service roles.
    pub roles: RolesConfig,
    /// Compute settings: version, key, placement and instance groups.
    pub ec2: Ec2Config,
    /// Tags attached to the cluster.
    #[serde(default)]
    pub tags: Vec<TagConfig>,
    /// Bootstrap actions run on every node before steps are accepted.
    #[serde(default)]
    pub bootstrap_action_configs: Vec<BootstrapActionConfig>,
    /// Software configuration overrides.
    #[serde(default)]
    pub configurations: Vec<SoftwareConfiguration>,
    /// Applications to install, restricted to [`ALLOWED_APPLICATIONS`].
    #[serde(default)]
    pub applications: Vec<String>,
}

impl ClusterConfig {
    /// Check that every required field is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MissingField` naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("logUri", &self.log_uri)?;
        require("region", &self.region)?;
        self.credentials.validate()?;
        require("roles.jobflow", &self.roles.jobflow)?;
        require("roles.service", &self.roles.service)?;
        require("ec2.amiVersion", &self.ec2.ami_version)?;
        require("ec2.instances.master.type", &self.ec2.instances.master.instance_type)?;
        if self.ec2.instances.core.count > 0 {
            require("ec2.instances.core.type", &self.ec2.instances.core.instance_type)?;
        }
        if self.ec2.instances.task.count > 0 {
            require("ec2.instances.task.type", &self.ec2.instances.task.instance_type)?;
        }
        Ok(())
    }
}

/// Declarative description of a batch of steps to run on an existing cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaybookConfig {
    /// Region of the target cluster.
    pub region: String,
    /// Credential selector pair.
    pub credentials: CredentialsConfig,
    /// Steps, submitted in this order.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl PlaybookConfig {
    /// Check that every required field is non-empty.
    ///
    /// An empty step list is not rejected here; the step runner reports it
    /// before any remote call is made.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MissingField` naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        require("region", &self.region)?;
        self.credentials.validate()
    }
}

/// One step of a playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepConfig {
    /// Step kind. Only custom jars are supported.
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    /// Step name.
    pub name: String,
    /// Raw failure-action policy, parsed by the step runner.
    pub action_on_failure: String,
    /// Path of the jar to run.
    pub jar: String,
    /// Arguments passed to the jar.
    #[serde(default)]
    pub arguments: Vec<String>,
}

fn default_step_type() -> String {
    "CUSTOM_JAR".to_string()
}

/// The access-key / secret-key selector pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Access key id, or `iam` / `env`.
    pub access_key_id: String,
    /// Secret access key, or `iam` / `env`.
    pub secret_access_key: String,
}

impl CredentialsConfig {
    /// Resolve the pair into a [`CredentialsMode`].
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MixedCredentials` if the pair mixes modes.
    pub fn resolve(&self) -> Result<CredentialsMode> {
        CredentialsMode::resolve(&self.access_key_id, &self.secret_access_key)
    }

    fn validate(&self) -> Result<()> {
        require("credentials.accessKeyId", &self.access_key_id)?;
        require("credentials.secretAccessKey", &self.secret_access_key)
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// IAM roles for the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolesConfig {
    /// Role assumed by the cluster instances.
    pub jobflow: String,
    /// Role assumed by the service on the caller's behalf.
    pub service: String,
}

/// Compute settings of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Ec2Config {
    /// Platform version, e.g. `3.11.0` or `5.9.0`.
    pub ami_version: String,
    /// SSH key pair name.
    #[serde(default)]
    pub key_name: String,
    /// Placement of the cluster.
    pub location: LocationConfig,
    /// Instance groups.
    pub instances: InstancesConfig,
}

/// Placement: a classic availability zone or a VPC subnet.
///
/// Exactly one of the two must be present; the launch request builder
/// enforces this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    /// Classic placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classic: Option<ClassicLocation>,
    /// VPC placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<VpcLocation>,
}

/// Classic placement in an availability zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClassicLocation {
    /// Availability zone, e.g. `us-east-1a`.
    pub availability_zone: String,
}

/// Placement in a VPC subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VpcLocation {
    /// Subnet id, e.g. `subnet-123456`.
    pub subnet_id: String,
}

/// The three instance groups of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstancesConfig {
    /// Master group; always exactly one instance.
    pub master: MasterInstanceSpec,
    /// Core group.
    pub core: InstanceGroupSpec,
    /// Task group.
    pub task: InstanceGroupSpec,
}

/// The master group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MasterInstanceSpec {
    /// Instance type.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Optional block storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_configuration: Option<EbsConfiguration>,
}

/// A core or task group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstanceGroupSpec {
    /// Instance type.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Number of instances. A zero count drops the group from the request.
    pub count: i32,
    /// Spot bid price. Empty means on-demand.
    #[serde(default)]
    pub bid: String,
    /// Optional block storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_configuration: Option<EbsConfiguration>,
}

/// Block storage attached to each instance of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EbsConfiguration {
    /// Request EBS-optimized instances.
    #[serde(default)]
    pub ebs_optimized: bool,
    /// Volume sets.
    #[serde(default)]
    pub ebs_block_device_configs: Vec<EbsBlockDeviceConfig>,
}

/// A set of identical volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EbsBlockDeviceConfig {
    /// Number of volumes per instance.
    pub volumes_per_instance: i32,
    /// Shape of each volume.
    pub volume_specification: VolumeSpecification,
}

/// Shape of a single volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeSpecification {
    /// Provisioned IOPS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i32>,
    /// Volume size in GiB.
    #[serde(rename = "sizeInGB")]
    pub size_in_gb: i32,
    /// Volume type, e.g. `gp2`.
    pub volume_type: String,
}

/// A key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagConfig {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// A named bootstrap action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BootstrapActionConfig {
    /// Action name.
    pub name: String,
    /// Script to run.
    pub script_bootstrap_action: ScriptBootstrapAction,
}

/// Script location and arguments of a bootstrap action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptBootstrapAction {
    /// Script path, usually in object storage.
    pub path: String,
    /// Script arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// A software configuration override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoftwareConfiguration {
    /// Configuration classification, e.g. `spark-defaults`.
    pub classification: String,
    /// Properties to set.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::MissingField(field));
    }
    Ok(())
}
