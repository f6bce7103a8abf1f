//! Command line surface.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flowrunner_lock::ReleasePolicy;

/// Launch EMR clusters and run playbooks of steps on them.
#[derive(Parser, Debug)]
#[command(name = "flowrunner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log verbosity. `RUST_LOG` takes precedence when set.
    #[arg(
        long = "log-level",
        global = true,
        env = "FLOWRUNNER_LOG_LEVEL",
        value_enum,
        default_value = "info"
    )]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

/// Log verbosity levels accepted by `--log-level`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// The filter directive for this level.
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a cluster and print its jobflow id.
    Up(UpArgs),
    /// Add the steps of a playbook to a running cluster.
    Run(RunArgs),
    /// Terminate a cluster.
    Down(DownArgs),
    /// Launch a cluster, run a playbook on it, then terminate it.
    RunTransient(TransientArgs),
    /// Wait for every step already submitted to a cluster.
    Wait(WaitArgs),
}

/// Template variables shared by every command.
#[derive(Args, Debug, Default)]
pub struct VarsArg {
    /// Template variables as `key1,value1,key2,value2`.
    #[arg(long, default_value = "")]
    pub vars: String,
}

/// Locking flags shared by `run` and `run-transient`.
#[derive(Args, Debug, Default)]
pub struct LockArgs {
    /// Hard lock; kept held if the run fails.
    #[arg(long)]
    pub lock: Option<String>,

    /// Soft lock; always released.
    #[arg(long = "softLock")]
    pub soft_lock: Option<String>,

    /// Consul agent address; locks become Consul keys.
    #[arg(long)]
    pub consul: Option<String>,
}

/// The lock to take around an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    /// Lock file path or Consul key.
    pub name: String,
    /// When the lock is released.
    pub policy: ReleasePolicy,
    /// Consul agent address, if locking through Consul.
    pub consul: Option<String>,
}

impl LockArgs {
    /// Check flag combinations and pick the lock to take, if any.
    ///
    /// # Errors
    ///
    /// Returns an error for `--consul` without a lock, both lock kinds at
    /// once, or a lock combined with `--async`.
    pub fn resolve(&self, async_mode: bool) -> Result<Option<LockSpec>> {
        let lock = non_empty(self.lock.as_deref());
        let soft_lock = non_empty(self.soft_lock.as_deref());
        let consul = non_empty(self.consul.as_deref());

        if consul.is_some() && lock.is_none() && soft_lock.is_none() {
            bail!("--lock or --softLock is needed to make use of --consul");
        }
        if lock.is_some() && soft_lock.is_some() {
            bail!("--lock and --softLock are mutually exclusive");
        }
        if async_mode && (lock.is_some() || soft_lock.is_some()) {
            bail!("--async and --lock or --softLock are not compatible");
        }

        let spec = match (lock, soft_lock) {
            (Some(name), _) => Some((name, ReleasePolicy::OnSuccess)),
            (None, Some(name)) => Some((name, ReleasePolicy::Always)),
            (None, None) => None,
        };
        Ok(spec.map(|(name, policy)| LockSpec {
            name: name.to_string(),
            policy,
            consul: consul.map(str::to_string),
        }))
    }
}

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Cluster configuration file.
    #[arg(long = "emr-config")]
    pub emr_config: Option<PathBuf>,

    #[command(flatten)]
    pub vars: VarsArg,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Playbook file.
    #[arg(long = "emr-playbook")]
    pub emr_playbook: Option<PathBuf>,

    /// Jobflow id of the target cluster.
    #[arg(long = "emr-cluster")]
    pub emr_cluster: Option<String>,

    /// Return as soon as the steps are submitted.
    #[arg(long = "async")]
    pub async_mode: bool,

    #[command(flatten)]
    pub lock: LockArgs,

    #[command(flatten)]
    pub vars: VarsArg,

    /// Print the logs of failed steps.
    #[arg(long = "log-failed-steps")]
    pub log_failed_steps: bool,
}

#[derive(Args, Debug)]
pub struct DownArgs {
    /// Cluster configuration file.
    #[arg(long = "emr-config")]
    pub emr_config: Option<PathBuf>,

    /// Jobflow id of the cluster to terminate.
    #[arg(long = "emr-cluster")]
    pub emr_cluster: Option<String>,

    #[command(flatten)]
    pub vars: VarsArg,
}

#[derive(Args, Debug)]
pub struct TransientArgs {
    /// Cluster configuration file.
    #[arg(long = "emr-config")]
    pub emr_config: Option<PathBuf>,

    /// Playbook file.
    #[arg(long = "emr-playbook")]
    pub emr_playbook: Option<PathBuf>,

    #[command(flatten)]
    pub lock: LockArgs,

    #[command(flatten)]
    pub vars: VarsArg,

    /// Print the logs of failed steps.
    #[arg(long = "log-failed-steps")]
    pub log_failed_steps: bool,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Playbook file; supplies region and credentials.
    #[arg(long = "emr-playbook")]
    pub emr_playbook: Option<PathBuf>,

    /// Jobflow id of the cluster to wait on.
    #[arg(long = "emr-cluster")]
    pub emr_cluster: Option<String>,

    #[command(flatten)]
    pub vars: VarsArg,

    /// Print the logs of failed steps.
    #[arg(long = "log-failed-steps")]
    pub log_failed_steps: bool,
}

/// Unwrap a flag that must be present.
///
/// # Errors
///
/// Returns `--<flag> needs to be specified` when the value is missing or empty.
pub fn required<T: AsRef<std::ffi::OsStr>>(flag: &str, value: Option<T>) -> Result<T> {
    match value {
        Some(value) if !value.as_ref().is_empty() => Ok(value),
        _ => bail!("--{flag} needs to be specified"),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
