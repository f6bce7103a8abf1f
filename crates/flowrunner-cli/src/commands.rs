//! Command implementations.
//!
//! Every command resolves its records first, then talks to the remote APIs
//! through [`Clients`], which is generic so the orchestration can be run
//! against the in-memory backends.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use flowrunner_config::{parse_vars, ConfigResolver};
use flowrunner_control::{
    load_sdk_config, AwsClusterApi, AwsStorageApi, ClusterApi, ClusterLauncher, ControlConfig,
    LogRetriever, StepRunner, StorageApi,
};
use flowrunner_core::{ClusterConfig, ClusterHandle, CredentialsConfig, PlaybookConfig, StepId};
use flowrunner_lock::{Lock, LockBackend, ReleasePolicy};

use crate::args::{required, Command, LockSpec};

/// Remote API clients for one region and credential pair.
pub struct Clients<C: ClusterApi, S: StorageApi> {
    cluster: Arc<C>,
    storage: Arc<S>,
    config: ControlConfig,
}

impl Clients<AwsClusterApi, AwsStorageApi> {
    /// Build AWS clients from a record's region and credentials.
    pub async fn connect(
        region: &str,
        credentials: &CredentialsConfig,
        config: ControlConfig,
    ) -> Result<Self> {
        let credentials = credentials.resolve()?;
        let sdk = load_sdk_config(region, &credentials).await;
        Ok(Self::new(
            Arc::new(AwsClusterApi::new(&sdk)),
            Arc::new(AwsStorageApi::new(&sdk)),
            config,
        ))
    }
}

impl<C: ClusterApi, S: StorageApi> Clients<C, S> {
    pub fn new(cluster: Arc<C>, storage: Arc<S>, config: ControlConfig) -> Self {
        Self {
            cluster,
            storage,
            config,
        }
    }

    fn launcher(&self) -> ClusterLauncher<C> {
        ClusterLauncher::new(Arc::clone(&self.cluster), self.config.clone())
    }

    fn runner(&self) -> StepRunner<C> {
        StepRunner::new(Arc::clone(&self.cluster), self.config.clone())
    }

    /// Launch a cluster and wait until it is ready.
    pub async fn launch(&self, cluster: &ClusterConfig) -> Result<ClusterHandle> {
        let handle = self.launcher().launch(cluster).await?;
        tracing::info!(cluster = %handle, "EMR cluster launched successfully; Jobflow ID: {handle}");
        Ok(handle)
    }

    /// Terminate a cluster and wait until it has shut down.
    pub async fn terminate(&self, handle: &ClusterHandle) -> Result<()> {
        self.launcher().terminate(handle).await?;
        tracing::info!(cluster = %handle, "EMR cluster terminated successfully");
        Ok(())
    }

    /// Submit a playbook, optionally waiting for every step to finish.
    pub async fn run(
        &self,
        playbook: &PlaybookConfig,
        handle: &ClusterHandle,
        blocking: bool,
        log_failed_steps: bool,
    ) -> Result<()> {
        let outcome = self.runner().submit(playbook, handle, blocking).await;
        self.finish_steps(handle, outcome.map(|_| ()), blocking, log_failed_steps)
            .await
    }

    /// Wait for every step already known to a cluster.
    pub async fn wait(&self, handle: &ClusterHandle, log_failed_steps: bool) -> Result<()> {
        let runner = self.runner();
        let steps = runner.step_ids(handle).await?;
        tracing::info!(cluster = %handle, count = steps.len(), "Waiting for steps");

        let outcome = runner.await_completion(handle, &steps).await;
        self.finish_steps(handle, outcome, true, log_failed_steps)
            .await
    }

    async fn finish_steps(
        &self,
        handle: &ClusterHandle,
        outcome: flowrunner_control::Result<()>,
        blocking: bool,
        log_failed_steps: bool,
    ) -> Result<()> {
        match outcome {
            Ok(()) if blocking => {
                tracing::info!(cluster = %handle, "All steps completed successfully");
                Ok(())
            }
            Ok(()) => Ok(()),
            Err(err) => {
                if log_failed_steps {
                    self.log_failed_steps(handle, err.failed_step_ids()).await;
                }
                Err(err.into())
            }
        }
    }

    async fn log_failed_steps(&self, handle: &ClusterHandle, steps: &[StepId]) {
        let retriever = LogRetriever::new(Arc::clone(&self.cluster), Arc::clone(&self.storage));
        for step in steps {
            match retriever.fetch_step_logs(handle, step).await {
                Ok(logs) => {
                    for (name, content) in logs {
                        tracing::error!(cluster = %handle, step = %step, "{name}:\n{content}");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        cluster = %handle,
                        step = %step,
                        error = %err,
                        "Couldn't retrieve logs for failed step"
                    );
                }
            }
        }
    }
}

/// Launch a cluster, run a playbook on it and terminate it.
///
/// The lock, if any, is held only while the steps run. The cluster is
/// terminated even when the run fails; the run's failure is reported
/// afterwards.
pub async fn run_transient<C, S, R, T>(
    cluster_side: &Clients<C, S>,
    step_side: &Clients<R, T>,
    cluster: &ClusterConfig,
    playbook: &PlaybookConfig,
    lock: Option<(&dyn Lock, ReleasePolicy)>,
    log_failed_steps: bool,
) -> Result<()>
where
    C: ClusterApi,
    S: StorageApi,
    R: ClusterApi,
    T: StorageApi,
{
    let handle = cluster_side.launch(cluster).await?;
    let run = with_lock(
        lock,
        step_side.run(playbook, &handle, true, log_failed_steps),
    )
    .await;

    if let Err(err) = cluster_side.terminate(&handle).await {
        if run.is_err() {
            tracing::error!(cluster = %handle, error = %err, "Couldn't terminate EMR cluster");
            return run;
        }
        return Err(err);
    }

    match run {
        Ok(()) => {
            tracing::info!(cluster = %handle, "Transient EMR run completed successfully");
            Ok(())
        }
        Err(err) => {
            tracing::error!(cluster = %handle, "Transient EMR run completed with errors");
            Err(err)
        }
    }
}

/// Run `operation` while holding `lock`, releasing it per its policy.
///
/// A contested lock fails immediately without running the operation.
pub async fn with_lock<L, F, T>(lock: Option<(&L, ReleasePolicy)>, operation: F) -> Result<T>
where
    L: Lock + ?Sized,
    F: Future<Output = Result<T>>,
{
    let Some((lock, policy)) = lock else {
        return operation.await;
    };

    lock.try_acquire().await?;
    tracing::debug!("Lock acquired");
    let result = operation.await;

    if !policy.should_release(result.is_ok()) {
        tracing::warn!("Operation failed; the lock is kept and must be cleared manually");
        return result;
    }

    match lock.release().await {
        Ok(()) => result,
        Err(err) if result.is_ok() => Err(err).context("couldn't release lock"),
        Err(err) => {
            tracing::warn!(error = %err, "Couldn't release lock");
            result
        }
    }
}

fn open_lock(spec: &LockSpec) -> Result<(LockBackend, ReleasePolicy)> {
    let backend = LockBackend::from_flags(&spec.name, spec.consul.as_deref())?;
    Ok((backend, spec.policy))
}

/// Execute one parsed command against AWS.
pub async fn execute(command: Command) -> Result<()> {
    let resolver = ConfigResolver::new();
    let config = ControlConfig::from_env();

    match command {
        Command::Up(args) => {
            let path = required("emr-config", args.emr_config)?;
            let vars = parse_vars(&args.vars.vars)?;
            let cluster = resolver.resolve_cluster(&path, &vars)?;

            let clients = Clients::connect(&cluster.region, &cluster.credentials, config).await?;
            let handle = clients.launch(&cluster).await?;
            println!("{handle}");
        }

        Command::Run(args) => {
            let path = required("emr-playbook", args.emr_playbook)?;
            let handle = ClusterHandle::new(required("emr-cluster", args.emr_cluster)?)?;
            let lock = args.lock.resolve(args.async_mode)?;
            let vars = parse_vars(&args.vars.vars)?;
            let playbook = resolver.resolve_playbook(&path, &vars)?;

            let clients =
                Clients::connect(&playbook.region, &playbook.credentials, config).await?;
            let lock = lock.as_ref().map(open_lock).transpose()?;
            with_lock(
                lock.as_ref().map(|(lock, policy)| (lock, *policy)),
                clients.run(&playbook, &handle, !args.async_mode, args.log_failed_steps),
            )
            .await?;
        }

        Command::Down(args) => {
            let path = required("emr-config", args.emr_config)?;
            let handle = ClusterHandle::new(required("emr-cluster", args.emr_cluster)?)?;
            let vars = parse_vars(&args.vars.vars)?;
            let cluster = resolver.resolve_cluster(&path, &vars)?;

            let clients = Clients::connect(&cluster.region, &cluster.credentials, config).await?;
            clients.terminate(&handle).await?;
        }

        Command::RunTransient(args) => {
            let cluster_path = required("emr-config", args.emr_config)?;
            let playbook_path = required("emr-playbook", args.emr_playbook)?;
            let lock = args.lock.resolve(false)?;
            let vars = parse_vars(&args.vars.vars)?;
            let cluster = resolver.resolve_cluster(&cluster_path, &vars)?;
            let playbook = resolver.resolve_playbook(&playbook_path, &vars)?;

            let cluster_side =
                Clients::connect(&cluster.region, &cluster.credentials, config.clone()).await?;
            let step_side =
                Clients::connect(&playbook.region, &playbook.credentials, config).await?;
            let lock = lock.as_ref().map(open_lock).transpose()?;
            run_transient(
                &cluster_side,
                &step_side,
                &cluster,
                &playbook,
                lock.as_ref()
                    .map(|(lock, policy)| (lock as &dyn Lock, *policy)),
                args.log_failed_steps,
            )
            .await?;
        }

        Command::Wait(args) => {
            let path = required("emr-playbook", args.emr_playbook)?;
            let handle = ClusterHandle::new(required("emr-cluster", args.emr_cluster)?)?;
            let vars = parse_vars(&args.vars.vars)?;
            let playbook = resolver.resolve_playbook(&path, &vars)?;

            let clients =
                Clients::connect(&playbook.region, &playbook.credentials, config).await?;
            clients.wait(&handle, args.log_failed_steps).await?;
        }
    }

    Ok(())
}
