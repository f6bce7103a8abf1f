//! AWS implementations of the remote APIs.
//!
//! [`AwsClusterApi`] talks to EMR and [`AwsStorageApi`] to S3. Both are
//! built from a shared SDK configuration whose credentials come from the
//! resolved [`CredentialsMode`].

use std::path::Path;

use async_trait::async_trait;
use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_emr::config::Credentials;
use aws_sdk_emr::error::DisplayErrorContext;
use aws_sdk_emr::types as emr;
use chrono::{DateTime, Utc};
use flowrunner_core::{
    BootstrapActionConfig, ClusterHandle, CredentialsMode, EbsConfiguration,
    SoftwareConfiguration, StepId, TagConfig,
};

use crate::api::{ClusterApi, StorageApi};
use crate::error::{ControlError, Result};
use crate::request::{
    InstanceGroupRequest, InstanceRole, InstancesRequest, LaunchRequest, Market, Placement,
    StepEntry, StepRequest,
};
use crate::types::{
    ActionOnFailure, ClusterDescription, ClusterState, ObjectPage, StepDescription, StepState,
};

/// Load SDK configuration for a region and credential mode.
pub async fn load_sdk_config(region: &str, credentials: &CredentialsMode) -> SdkConfig {
    let loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));

    let loader = match credentials {
        CredentialsMode::Role => {
            loader.credentials_provider(ImdsCredentialsProvider::builder().build())
        }
        CredentialsMode::Env => {
            loader.credentials_provider(EnvironmentVariableCredentialsProvider::new())
        }
        CredentialsMode::Static {
            access_key_id,
            secret_access_key,
        } => loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "flowrunner",
        )),
    };

    loader.load().await
}

fn remote<E>(context: &'static str) -> impl FnOnce(E) -> ControlError
where
    E: std::error::Error,
{
    move |err| ControlError::Remote(format!("{context}: {}", DisplayErrorContext(&err)))
}

/// EMR-backed cluster API.
#[derive(Clone)]
pub struct AwsClusterApi {
    client: aws_sdk_emr::Client,
}

impl AwsClusterApi {
    /// Create a client from SDK configuration.
    #[must_use]
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_emr::Client::new(config),
        }
    }

    /// Create a client for a region and credential mode.
    pub async fn connect(region: &str, credentials: &CredentialsMode) -> Self {
        Self::new(&load_sdk_config(region, credentials).await)
    }
}

#[async_trait]
impl ClusterApi for AwsClusterApi {
    async fn run_job_flow(&self, request: &LaunchRequest) -> Result<ClusterHandle> {
        let output = self
            .client
            .run_job_flow()
            .name(&request.name)
            .log_uri(&request.log_uri)
            .job_flow_role(&request.job_flow_role)
            .service_role(&request.service_role)
            .set_ami_version(request.ami_version.clone())
            .set_release_label(request.release_label.clone())
            .instances(instances(&request.instances))
            .set_tags(request.tags.as_deref().map(tags))
            .set_bootstrap_actions(request.bootstrap_actions.as_deref().map(bootstrap_actions))
            .set_configurations(request.configurations.as_deref().map(configurations))
            .set_applications(request.applications.as_deref().map(applications))
            .visible_to_all_users(request.visible_to_all_users)
            .send()
            .await
            .map_err(remote("RunJobFlow failed"))?;

        let id = output
            .job_flow_id()
            .ok_or_else(|| ControlError::Remote("RunJobFlow returned no jobflow id".into()))?;
        ClusterHandle::new(id).map_err(|e| ControlError::Remote(e.to_string()))
    }

    async fn describe_cluster(&self, cluster: &ClusterHandle) -> Result<ClusterDescription> {
        let output = self
            .client
            .describe_cluster()
            .cluster_id(cluster.as_str())
            .send()
            .await
            .map_err(remote("DescribeCluster failed"))?;

        let description = output
            .cluster()
            .ok_or_else(|| ControlError::Remote(format!("cluster {cluster} not found")))?;
        let status = description.status();

        Ok(ClusterDescription {
            state: status
                .and_then(emr::ClusterStatus::state)
                .map_or_else(
                    || ClusterState::Unknown(String::new()),
                    |state| ClusterState::from_remote(state.as_str()),
                ),
            state_change_reason: status
                .and_then(emr::ClusterStatus::state_change_reason)
                .and_then(emr::ClusterStateChangeReason::code)
                .map(|code| code.as_str().to_string()),
            log_uri: description.log_uri().map(str::to_string),
        })
    }

    async fn terminate(&self, cluster: &ClusterHandle) -> Result<()> {
        self.client
            .terminate_job_flows()
            .job_flow_ids(cluster.as_str())
            .send()
            .await
            .map_err(remote("TerminateJobFlows failed"))?;
        Ok(())
    }

    async fn add_steps(&self, request: &StepRequest) -> Result<Vec<StepId>> {
        let steps = request.steps.iter().map(step_config).collect();

        let output = self
            .client
            .add_job_flow_steps()
            .job_flow_id(request.cluster.as_str())
            .set_steps(Some(steps))
            .send()
            .await
            .map_err(remote("AddJobFlowSteps failed"))?;

        output
            .step_ids()
            .iter()
            .map(|id| StepId::new(id.as_str()).map_err(|e| ControlError::Remote(e.to_string())))
            .collect()
    }

    async fn describe_step(
        &self,
        cluster: &ClusterHandle,
        step: &StepId,
    ) -> Result<StepDescription> {
        let output = self
            .client
            .describe_step()
            .cluster_id(cluster.as_str())
            .step_id(step.as_str())
            .send()
            .await
            .map_err(remote("DescribeStep failed"))?;

        let description = output
            .step()
            .ok_or_else(|| ControlError::Remote(format!("step {step} not found")))?;
        let status = description.status();
        let timeline = status.and_then(emr::StepStatus::timeline);

        Ok(StepDescription {
            id: step.clone(),
            name: description.name().unwrap_or_default().to_string(),
            state: status.and_then(emr::StepStatus::state).map_or_else(
                || StepState::Unknown(String::new()),
                |state| StepState::from_remote(state.as_str()),
            ),
            started_at: timeline
                .and_then(emr::StepTimeline::start_date_time)
                .and_then(to_chrono),
            ended_at: timeline
                .and_then(emr::StepTimeline::end_date_time)
                .and_then(to_chrono),
        })
    }

    async fn list_steps(&self, cluster: &ClusterHandle) -> Result<Vec<StepId>> {
        let mut ids = Vec::new();
        let mut marker = None;

        loop {
            let output = self
                .client
                .list_steps()
                .cluster_id(cluster.as_str())
                .set_marker(marker)
                .send()
                .await
                .map_err(remote("ListSteps failed"))?;

            for summary in output.steps() {
                if let Some(id) = summary.id() {
                    ids.push(StepId::new(id).map_err(|e| ControlError::Remote(e.to_string()))?);
                }
            }

            marker = output.marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        // Most recent first on the wire.
        ids.reverse();
        Ok(ids)
    }
}

fn to_chrono(time: &aws_sdk_emr::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

fn instances(request: &InstancesRequest) -> emr::JobFlowInstancesConfig {
    let groups = request.instance_groups.iter().map(instance_group).collect();

    let builder = emr::JobFlowInstancesConfig::builder()
        .set_ec2_key_name(Some(request.ec2_key_name.clone()).filter(|key| !key.is_empty()))
        .set_instance_groups(Some(groups))
        .keep_job_flow_alive_when_no_steps(request.keep_job_flow_alive_when_no_steps);

    let builder = match &request.placement {
        Placement::AvailabilityZone(zone) => builder.placement(
            emr::PlacementType::builder()
                .availability_zone(zone)
                .build(),
        ),
        Placement::Subnet(subnet) => builder.ec2_subnet_id(subnet),
    };

    builder.build()
}

fn instance_group(group: &InstanceGroupRequest) -> emr::InstanceGroupConfig {
    let role = match group.role {
        InstanceRole::Master => emr::InstanceRoleType::Master,
        InstanceRole::Core => emr::InstanceRoleType::Core,
        InstanceRole::Task => emr::InstanceRoleType::Task,
    };
    let market = group.market.map(|market| match market {
        Market::OnDemand => emr::MarketType::OnDemand,
        Market::Spot => emr::MarketType::Spot,
    });

    emr::InstanceGroupConfig::builder()
        .instance_role(role)
        .instance_type(&group.instance_type)
        .instance_count(group.count)
        .set_market(market)
        .set_bid_price(group.bid_price.clone())
        .set_ebs_configuration(group.ebs_configuration.as_ref().map(ebs_configuration))
        .build()
}

fn ebs_configuration(config: &EbsConfiguration) -> emr::EbsConfiguration {
    let devices = config
        .ebs_block_device_configs
        .iter()
        .map(|device| {
            let volume = emr::VolumeSpecification::builder()
                .volume_type(&device.volume_specification.volume_type)
                .size_in_gb(device.volume_specification.size_in_gb)
                .set_iops(device.volume_specification.iops)
                .build();
            emr::EbsBlockDeviceConfig::builder()
                .volume_specification(volume)
                .volumes_per_instance(device.volumes_per_instance)
                .build()
        })
        .collect();

    emr::EbsConfiguration::builder()
        .ebs_optimized(config.ebs_optimized)
        .set_ebs_block_device_configs(Some(devices))
        .build()
}

fn tags(tags: &[TagConfig]) -> Vec<emr::Tag> {
    tags.iter()
        .map(|tag| emr::Tag::builder().key(&tag.key).value(&tag.value).build())
        .collect()
}

fn bootstrap_actions(actions: &[BootstrapActionConfig]) -> Vec<emr::BootstrapActionConfig> {
    actions
        .iter()
        .map(|action| {
            let script = emr::ScriptBootstrapActionConfig::builder()
                .path(&action.script_bootstrap_action.path)
                .set_args(Some(action.script_bootstrap_action.args.clone()))
                .build();
            emr::BootstrapActionConfig::builder()
                .name(&action.name)
                .script_bootstrap_action(script)
                .build()
        })
        .collect()
}

fn configurations(configs: &[SoftwareConfiguration]) -> Vec<emr::Configuration> {
    configs
        .iter()
        .map(|config| {
            emr::Configuration::builder()
                .classification(&config.classification)
                .set_properties(Some(config.properties.clone().into_iter().collect()))
                .build()
        })
        .collect()
}

fn applications(names: &[String]) -> Vec<emr::Application> {
    names
        .iter()
        .map(|name| emr::Application::builder().name(name).build())
        .collect()
}

fn step_config(step: &StepEntry) -> emr::StepConfig {
    let jar = emr::HadoopJarStepConfig::builder()
        .jar(&step.jar)
        .set_args(Some(step.args.clone()))
        .build();

    let action = match step.action_on_failure {
        ActionOnFailure::CancelAndWait => emr::ActionOnFailure::CancelAndWait,
        ActionOnFailure::Continue => emr::ActionOnFailure::Continue,
    };

    emr::StepConfig::builder()
        .name(&step.name)
        .action_on_failure(action)
        .hadoop_jar_step(jar)
        .build()
}

/// S3-backed object storage API.
#[derive(Clone)]
pub struct AwsStorageApi {
    client: aws_sdk_s3::Client,
}

impl AwsStorageApi {
    /// Create a client from SDK configuration.
    #[must_use]
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }

    /// Create a client for a region and credential mode.
    pub async fn connect(region: &str, credentials: &CredentialsMode) -> Self {
        Self::new(&load_sdk_config(region, credentials).await)
    }
}

#[async_trait]
impl StorageApi for AwsStorageApi {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(remote("ListObjectsV2 failed"))?;

        Ok(ObjectPage {
            keys: output
                .contents()
                .iter()
                .filter_map(|object| object.key().map(str::to_string))
                .collect(),
            next: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(remote("GetObject failed"))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(remote("reading object body failed"))?
            .into_bytes();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, body).await?;
        Ok(())
    }
}
