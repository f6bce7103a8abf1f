//! Translation of declarative records into remote API requests.
//!
//! The request types are owned by this crate so that the launcher and the
//! step runner can be exercised without the cloud SDK; the AWS adapter maps
//! them onto SDK shapes.

use flowrunner_core::{
    BootstrapActionConfig, ClusterConfig, ClusterHandle, EbsConfiguration, PlaybookConfig,
    SoftwareConfiguration, TagConfig, ALLOWED_APPLICATIONS,
};
use serde::Serialize;

use crate::error::{ControlError, Result};
use crate::types::ActionOnFailure;

/// Prefix of release labels for platform versions 4 and later.
pub const RELEASE_LABEL_PREFIX: &str = "emr-";

/// First major version addressed by release label instead of AMI version.
const FIRST_RELEASE_LABEL_MAJOR: u32 = 4;

/// Request to launch a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRequest {
    /// Cluster name.
    pub name: String,
    /// Log location.
    pub log_uri: String,
    /// Role assumed by the instances.
    pub job_flow_role: String,
    /// Role assumed by the service.
    pub service_role: String,
    /// Legacy version field, set for major versions below 4.
    pub ami_version: Option<String>,
    /// Release label, set for major versions 4 and later.
    pub release_label: Option<String>,
    /// Instance settings.
    pub instances: InstancesRequest,
    /// Tags; `None` when the record has none.
    pub tags: Option<Vec<TagConfig>>,
    /// Bootstrap actions; `None` when the record has none.
    pub bootstrap_actions: Option<Vec<BootstrapActionConfig>>,
    /// Configuration overrides; `None` when the record has none.
    pub configurations: Option<Vec<SoftwareConfiguration>>,
    /// Applications; `None` when the record has none.
    pub applications: Option<Vec<String>>,
    /// Make the cluster visible to every user of the account.
    pub visible_to_all_users: bool,
}

/// Instance settings of a launch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstancesRequest {
    /// SSH key pair name.
    pub ec2_key_name: String,
    /// Where the cluster is placed.
    pub placement: Placement,
    /// Instance groups in master, core, task order.
    pub instance_groups: Vec<InstanceGroupRequest>,
    /// Keep the cluster alive once it has no steps left.
    pub keep_job_flow_alive_when_no_steps: bool,
}

/// Cluster placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Placement {
    /// Classic placement in an availability zone.
    AvailabilityZone(String),
    /// Placement in a VPC subnet.
    Subnet(String),
}

/// Role of an instance group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceRole {
    /// The single master node.
    Master,
    /// Core nodes (storage and compute).
    Core,
    /// Task nodes (compute only).
    Task,
}

/// Purchasing market of an instance group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Market {
    /// On-demand capacity.
    OnDemand,
    /// Spot capacity at a bid price.
    Spot,
}

/// One instance group of a launch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceGroupRequest {
    /// Group role.
    pub role: InstanceRole,
    /// Instance type.
    pub instance_type: String,
    /// Number of instances.
    pub count: i32,
    /// Market; set to spot when a bid is given.
    pub market: Option<Market>,
    /// Spot bid price.
    pub bid_price: Option<String>,
    /// Block storage.
    pub ebs_configuration: Option<EbsConfiguration>,
}

/// Request to add steps to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRequest {
    /// Target cluster.
    pub cluster: ClusterHandle,
    /// Steps in submission order.
    pub steps: Vec<StepEntry>,
}

/// One step of a step request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepEntry {
    /// Step name.
    pub name: String,
    /// Jar to run.
    pub jar: String,
    /// Jar arguments.
    pub args: Vec<String>,
    /// What to do with later steps if this one fails.
    pub action_on_failure: ActionOnFailure,
}

/// Build a launch request from a cluster record.
///
/// # Errors
///
/// Returns an error if the placement is ambiguous or missing, the version
/// does not start with a digit, or an application is not allowed.
pub fn build_launch_request(config: &ClusterConfig) -> Result<LaunchRequest> {
    let placement = resolve_placement(config)?;
    let applications = resolve_applications(&config.applications)?;
    let (ami_version, release_label) = resolve_version(&config.ec2.ami_version)?;

    Ok(LaunchRequest {
        name: config.name.clone(),
        log_uri: config.log_uri.clone(),
        job_flow_role: config.roles.jobflow.clone(),
        service_role: config.roles.service.clone(),
        ami_version,
        release_label,
        instances: InstancesRequest {
            ec2_key_name: config.ec2.key_name.clone(),
            placement,
            instance_groups: instance_groups(config),
            keep_job_flow_alive_when_no_steps: true,
        },
        tags: non_empty(&config.tags),
        bootstrap_actions: non_empty(&config.bootstrap_action_configs),
        configurations: non_empty(&config.configurations),
        applications,
        visible_to_all_users: true,
    })
}

/// Build a step request from a playbook.
///
/// # Errors
///
/// Returns `ControlError::NoSteps` for an empty playbook and
/// `ControlError::DisallowedFailureAction` for a step that would terminate
/// the cluster.
pub fn build_step_request(playbook: &PlaybookConfig, cluster: &ClusterHandle) -> Result<StepRequest> {
    if playbook.steps.is_empty() {
        return Err(ControlError::NoSteps);
    }

    let steps = playbook
        .steps
        .iter()
        .map(|step| {
            Ok(StepEntry {
                name: step.name.clone(),
                jar: step.jar.clone(),
                args: step.arguments.clone(),
                action_on_failure: ActionOnFailure::parse(&step.action_on_failure)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StepRequest {
        cluster: cluster.clone(),
        steps,
    })
}

fn resolve_placement(config: &ClusterConfig) -> Result<Placement> {
    let location = &config.ec2.location;
    match (&location.classic, &location.vpc) {
        (Some(_), Some(_)) => Err(ControlError::LocationConflict),
        (None, Some(vpc)) => Ok(Placement::Subnet(vpc.subnet_id.clone())),
        (Some(classic), None) => Ok(Placement::AvailabilityZone(
            classic.availability_zone.clone(),
        )),
        (None, None) => Err(ControlError::LocationMissing),
    }
}

fn resolve_version(version: &str) -> Result<(Option<String>, Option<String>)> {
    let major = version
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| ControlError::InvalidVersion(version.to_string()))?;

    if major < FIRST_RELEASE_LABEL_MAJOR {
        Ok((Some(version.to_string()), None))
    } else {
        Ok((None, Some(format!("{RELEASE_LABEL_PREFIX}{version}"))))
    }
}

fn resolve_applications(applications: &[String]) -> Result<Option<Vec<String>>> {
    if let Some(bad) = applications
        .iter()
        .find(|app| !ALLOWED_APPLICATIONS.contains(&app.as_str()))
    {
        return Err(ControlError::UnsupportedApplication(bad.clone()));
    }
    Ok(non_empty(applications))
}

fn instance_groups(config: &ClusterConfig) -> Vec<InstanceGroupRequest> {
    let instances = &config.ec2.instances;

    let mut groups = vec![InstanceGroupRequest {
        role: InstanceRole::Master,
        instance_type: instances.master.instance_type.clone(),
        count: 1,
        market: None,
        bid_price: None,
        ebs_configuration: instances.master.ebs_configuration.clone(),
    }];

    for (role, spec) in [
        (InstanceRole::Core, &instances.core),
        (InstanceRole::Task, &instances.task),
    ] {
        if spec.count <= 0 {
            continue;
        }
        let bid_price = Some(spec.bid.clone()).filter(|bid| !bid.is_empty());
        groups.push(InstanceGroupRequest {
            role,
            instance_type: spec.instance_type.clone(),
            count: spec.count,
            market: bid_price.as_ref().map(|_| Market::Spot),
            bid_price,
            ebs_configuration: spec.ebs_configuration.clone(),
        });
    }

    groups
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{cluster, playbook, step};
    use super::*;
    use flowrunner_core::{EbsBlockDeviceConfig, VolumeSpecification, VpcLocation};

    fn roles(request: &LaunchRequest) -> Vec<InstanceRole> {
        request
            .instances
            .instance_groups
            .iter()
            .map(|g| g.role)
            .collect()
    }

    #[test]
    fn launch_request_end_to_end() {
        let request = build_launch_request(&cluster(3, 1, "0.015", "4.5.0")).unwrap();

        assert_eq!(
            roles(&request),
            vec![InstanceRole::Master, InstanceRole::Core, InstanceRole::Task]
        );
        let task = &request.instances.instance_groups[2];
        assert_eq!(task.market, Some(Market::Spot));
        assert_eq!(task.bid_price.as_deref(), Some("0.015"));
        assert_eq!(request.release_label.as_deref(), Some("emr-4.5.0"));
        assert_eq!(request.ami_version, None);
        assert_eq!(
            request.instances.placement,
            Placement::AvailabilityZone("us-east-1a".to_string())
        );
        assert!(request.instances.keep_job_flow_alive_when_no_steps);
        assert!(request.visible_to_all_users);
        assert_eq!(request.tags, None);
        assert_eq!(request.bootstrap_actions, None);
        assert_eq!(request.configurations, None);
        assert_eq!(request.applications, None);
    }

    #[test]
    fn zero_count_groups_dropped() {
        let cases = [
            (0, 0, vec![InstanceRole::Master]),
            (2, 0, vec![InstanceRole::Master, InstanceRole::Core]),
            (0, 2, vec![InstanceRole::Master, InstanceRole::Task]),
            (
                2,
                2,
                vec![InstanceRole::Master, InstanceRole::Core, InstanceRole::Task],
            ),
        ];
        for (core, task, expected) in cases {
            let request = build_launch_request(&cluster(core, task, "", "4.5.0")).unwrap();
            assert_eq!(roles(&request), expected, "core={core} task={task}");
        }
    }

    #[test]
    fn empty_bid_is_on_demand() {
        let request = build_launch_request(&cluster(1, 1, "", "4.5.0")).unwrap();
        for group in &request.instances.instance_groups {
            assert_eq!(group.market, None);
            assert_eq!(group.bid_price, None);
        }
    }

    #[test]
    fn core_bid_is_honored() {
        let mut config = cluster(2, 0, "", "5.0.0");
        config.ec2.instances.core.bid = "0.2".to_string();
        let request = build_launch_request(&config).unwrap();
        assert_eq!(request.instances.instance_groups[1].market, Some(Market::Spot));
    }

    #[test]
    fn version_routing() {
        let request = build_launch_request(&cluster(1, 0, "", "3.11.0")).unwrap();
        assert_eq!(request.ami_version.as_deref(), Some("3.11.0"));
        assert_eq!(request.release_label, None);

        let request = build_launch_request(&cluster(1, 0, "", "5.9.0")).unwrap();
        assert_eq!(request.release_label.as_deref(), Some("emr-5.9.0"));

        let err = build_launch_request(&cluster(1, 0, "", "v5.9.0")).unwrap_err();
        assert!(matches!(err, ControlError::InvalidVersion(_)));
    }

    #[test]
    fn placement_must_be_exactly_one() {
        let mut config = cluster(1, 0, "", "4.5.0");
        config.ec2.location.vpc = Some(VpcLocation {
            subnet_id: "subnet-123456".to_string(),
        });
        let err = build_launch_request(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Only one of Availability Zone and Subnet id should be provided"
        );

        config.ec2.location.classic = None;
        let request = build_launch_request(&config).unwrap();
        assert_eq!(
            request.instances.placement,
            Placement::Subnet("subnet-123456".to_string())
        );

        config.ec2.location.vpc = None;
        let err = build_launch_request(&config).unwrap_err();
        assert!(matches!(err, ControlError::LocationMissing));
    }

    #[test]
    fn applications_restricted() {
        let mut config = cluster(1, 0, "", "4.5.0");
        config.applications = vec!["Hadoop".to_string(), "Spark".to_string()];
        let request = build_launch_request(&config).unwrap();
        assert_eq!(request.applications.unwrap().len(), 2);

        config.applications.push("Presto".to_string());
        let err = build_launch_request(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Only Hadoop, Hive, Mahout, Pig, Spark are allowed applications"
        );
    }

    #[test]
    fn ebs_configuration_attached_per_group() {
        let mut config = cluster(1, 1, "", "4.5.0");
        config.ec2.instances.task.ebs_configuration = Some(EbsConfiguration {
            ebs_optimized: true,
            ebs_block_device_configs: vec![EbsBlockDeviceConfig {
                volumes_per_instance: 4,
                volume_specification: VolumeSpecification {
                    iops: Some(100),
                    size_in_gb: 6,
                    volume_type: "standard".to_string(),
                },
            }],
        });

        let request = build_launch_request(&config).unwrap();
        let groups = &request.instances.instance_groups;
        assert!(groups[0].ebs_configuration.is_none());
        assert!(groups[1].ebs_configuration.is_none());
        assert!(groups[2].ebs_configuration.as_ref().unwrap().ebs_optimized);
    }

    #[test]
    fn step_request_preserves_order() {
        let handle = ClusterHandle::new("j-123").unwrap();
        let playbook = playbook(vec![step("first", "CANCEL_AND_WAIT"), step("second", "CONTINUE")]);

        let request = build_step_request(&playbook, &handle).unwrap();
        assert_eq!(request.cluster, handle);
        assert_eq!(request.steps.len(), 2);
        assert_eq!(request.steps[0].name, "first");
        assert_eq!(request.steps[1].action_on_failure, ActionOnFailure::Continue);
        assert_eq!(request.steps[0].args.len(), 2);
    }

    #[test]
    fn step_request_rejects_bad_input() {
        let handle = ClusterHandle::new("j-123").unwrap();

        let err = build_step_request(&playbook(Vec::new()), &handle).unwrap_err();
        assert!(matches!(err, ControlError::NoSteps));

        let bad = playbook(vec![step("ok", "CONTINUE"), step("bad", "TERMINATE_CLUSTER")]);
        let err = build_step_request(&bad, &handle).unwrap_err();
        assert!(matches!(err, ControlError::DisallowedFailureAction(_)));
    }
}
