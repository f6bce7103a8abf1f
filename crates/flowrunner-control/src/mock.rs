//! In-memory implementations of the remote APIs for tests.
//!
//! Both mocks are scriptable: cluster and step states are served from
//! queues, so a test can describe the exact sequence of states a poll loop
//! will observe. The last entry of a queue is sticky and is returned for
//! every further poll.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowrunner_core::{ClusterHandle, StepId};
use parking_lot::Mutex;

use crate::api::{ClusterApi, StorageApi};
use crate::error::{ControlError, Result};
use crate::request::{LaunchRequest, StepRequest};
use crate::types::{ClusterDescription, ClusterState, ObjectPage, StepDescription, StepState};

/// Build a cluster description with no reason code and no log location.
#[must_use]
pub fn cluster_status(state: ClusterState) -> ClusterDescription {
    ClusterDescription {
        state,
        state_change_reason: None,
        log_uri: None,
    }
}

fn pop_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

struct MockStep {
    name: String,
    created_at: DateTime<Utc>,
    states: VecDeque<StepState>,
}

#[derive(Default)]
struct ClusterInner {
    next_cluster: u32,
    next_step: u32,
    launches: Vec<LaunchRequest>,
    launch_script: Vec<ClusterDescription>,
    clusters: HashMap<ClusterHandle, VecDeque<ClusterDescription>>,
    terminated: Vec<ClusterHandle>,
    step_requests: Vec<StepRequest>,
    step_scripts: VecDeque<Vec<StepState>>,
    cluster_steps: HashMap<ClusterHandle, Vec<StepId>>,
    steps: HashMap<StepId, MockStep>,
    describe_cluster_calls: usize,
    describe_step_calls: usize,
    failures: HashMap<&'static str, String>,
}

/// A mock cluster API that keeps clusters and steps in memory.
#[derive(Default)]
pub struct MockClusterApi {
    inner: Mutex<ClusterInner>,
}

impl MockClusterApi {
    /// Create a new mock cluster API.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description sequence every newly launched cluster goes through.
    pub fn set_launch_script(&self, script: Vec<ClusterDescription>) {
        self.inner.lock().launch_script = script;
    }

    /// Set the description sequence of an existing cluster.
    pub fn script_cluster(&self, cluster: &ClusterHandle, script: Vec<ClusterDescription>) {
        self.inner
            .lock()
            .clusters
            .insert(cluster.clone(), script.into());
    }

    /// Queue state sequences for the next submitted steps, one per step.
    ///
    /// Steps submitted without a queued sequence complete immediately.
    pub fn script_next_steps(&self, scripts: Vec<Vec<StepState>>) {
        self.inner.lock().step_scripts.extend(scripts);
    }

    /// Register a step that already exists on a cluster.
    pub fn add_existing_step(
        &self,
        cluster: &ClusterHandle,
        name: &str,
        states: Vec<StepState>,
    ) -> StepId {
        let mut inner = self.inner.lock();
        let id = Self::mint_step(&mut inner, name, states);
        inner
            .cluster_steps
            .entry(cluster.clone())
            .or_default()
            .push(id.clone());
        id
    }

    /// Make the next call to `operation` fail with `message`.
    ///
    /// `operation` is the trait method name, e.g. `"add_steps"`.
    pub fn fail_next(&self, operation: &'static str, message: impl Into<String>) {
        self.inner.lock().failures.insert(operation, message.into());
    }

    /// Launch requests received so far.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.inner.lock().launches.clone()
    }

    /// Clusters a termination was requested for.
    #[must_use]
    pub fn terminated(&self) -> Vec<ClusterHandle> {
        self.inner.lock().terminated.clone()
    }

    /// Step requests received so far.
    #[must_use]
    pub fn step_requests(&self) -> Vec<StepRequest> {
        self.inner.lock().step_requests.clone()
    }

    /// Number of `describe_cluster` calls.
    #[must_use]
    pub fn describe_cluster_calls(&self) -> usize {
        self.inner.lock().describe_cluster_calls
    }

    /// Number of `describe_step` calls.
    #[must_use]
    pub fn describe_step_calls(&self) -> usize {
        self.inner.lock().describe_step_calls
    }

    fn check_failure(&self, operation: &'static str) -> Result<()> {
        match self.inner.lock().failures.remove(operation) {
            Some(message) => Err(ControlError::Remote(message)),
            None => Ok(()),
        }
    }

    fn mint_step(inner: &mut ClusterInner, name: &str, states: Vec<StepState>) -> StepId {
        inner.next_step += 1;
        let id = mock_step_id(inner.next_step);
        inner.steps.insert(
            id.clone(),
            MockStep {
                name: name.to_string(),
                created_at: Utc::now(),
                states: states.into(),
            },
        );
        id
    }
}

fn mock_step_id(n: u32) -> StepId {
    StepId::new(format!("s-MOCK{n:08}")).expect("mock step ids are never empty")
}

fn mock_cluster_handle(n: u32) -> ClusterHandle {
    ClusterHandle::new(format!("j-MOCK{n:08}")).expect("mock handles are never empty")
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn run_job_flow(&self, request: &LaunchRequest) -> Result<ClusterHandle> {
        self.check_failure("run_job_flow")?;

        let mut inner = self.inner.lock();
        inner.next_cluster += 1;
        let handle = mock_cluster_handle(inner.next_cluster);
        inner.launches.push(request.clone());
        let script = inner.launch_script.clone();
        inner.clusters.insert(handle.clone(), script.into());
        Ok(handle)
    }

    async fn describe_cluster(&self, cluster: &ClusterHandle) -> Result<ClusterDescription> {
        self.check_failure("describe_cluster")?;

        let mut inner = self.inner.lock();
        inner.describe_cluster_calls += 1;
        inner
            .clusters
            .get_mut(cluster)
            .and_then(pop_sticky)
            .ok_or_else(|| ControlError::Remote(format!("cluster {cluster} not found")))
    }

    async fn terminate(&self, cluster: &ClusterHandle) -> Result<()> {
        self.check_failure("terminate")?;
        self.inner.lock().terminated.push(cluster.clone());
        Ok(())
    }

    async fn add_steps(&self, request: &StepRequest) -> Result<Vec<StepId>> {
        self.check_failure("add_steps")?;

        let mut inner = self.inner.lock();
        inner.step_requests.push(request.clone());

        let mut ids = Vec::with_capacity(request.steps.len());
        for step in &request.steps {
            let states = inner
                .step_scripts
                .pop_front()
                .unwrap_or_else(|| vec![StepState::Completed]);
            ids.push(Self::mint_step(&mut inner, &step.name, states));
        }
        inner
            .cluster_steps
            .entry(request.cluster.clone())
            .or_default()
            .extend(ids.iter().cloned());
        Ok(ids)
    }

    async fn describe_step(
        &self,
        _cluster: &ClusterHandle,
        step: &StepId,
    ) -> Result<StepDescription> {
        self.check_failure("describe_step")?;

        let mut inner = self.inner.lock();
        inner.describe_step_calls += 1;
        let mock = inner
            .steps
            .get_mut(step)
            .ok_or_else(|| ControlError::Remote(format!("step {step} not found")))?;
        let state = pop_sticky(&mut mock.states).unwrap_or(StepState::Pending);
        let finished = !matches!(
            state,
            StepState::Pending | StepState::Running | StepState::CancelPending
        );

        Ok(StepDescription {
            id: step.clone(),
            name: mock.name.clone(),
            started_at: finished.then_some(mock.created_at),
            ended_at: finished.then_some(mock.created_at),
            state,
        })
    }

    async fn list_steps(&self, cluster: &ClusterHandle) -> Result<Vec<StepId>> {
        self.check_failure("list_steps")?;
        Ok(self
            .inner
            .lock()
            .cluster_steps
            .get(cluster)
            .cloned()
            .unwrap_or_default())
    }
}

/// A mock object store that keeps objects in memory.
pub struct MockStorageApi {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    page_size: usize,
    list_calls: Mutex<usize>,
    fail_downloads: Mutex<Option<String>>,
}

impl Default for MockStorageApi {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

impl MockStorageApi {
    /// Create a new mock object store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that returns at most `page_size` keys per listing page.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            list_calls: Mutex::new(0),
            fail_downloads: Mutex::new(None),
        }
    }

    /// Store an object.
    pub fn put_object(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Make every download fail with `message`.
    pub fn fail_downloads(&self, message: impl Into<String>) {
        *self.fail_downloads.lock() = Some(message.into());
    }

    /// Number of listing pages served.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock()
    }
}

#[async_trait]
impl StorageApi for MockStorageApi {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage> {
        *self.list_calls.lock() += 1;

        let offset = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ControlError::Remote(format!("invalid continuation token {token}")))?,
            None => 0,
        };

        let matching: Vec<String> = self
            .objects
            .lock()
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect();

        let keys: Vec<String> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let consumed = offset + keys.len();
        let next = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(ObjectPage { keys, next })
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<()> {
        if let Some(message) = self.fail_downloads.lock().clone() {
            return Err(ControlError::Remote(message));
        }

        let body = self
            .objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ControlError::Remote(format!("no such key {bucket}/{key}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cluster_script_is_sticky() {
        let api = MockClusterApi::new();
        let handle = ClusterHandle::new("j-1").unwrap();
        api.script_cluster(
            &handle,
            vec![
                cluster_status(ClusterState::Starting),
                cluster_status(ClusterState::Waiting),
            ],
        );

        assert_eq!(
            api.describe_cluster(&handle).await.unwrap().state,
            ClusterState::Starting
        );
        assert_eq!(
            api.describe_cluster(&handle).await.unwrap().state,
            ClusterState::Waiting
        );
        assert_eq!(
            api.describe_cluster(&handle).await.unwrap().state,
            ClusterState::Waiting
        );
        assert_eq!(api.describe_cluster_calls(), 3);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let api = MockClusterApi::new();
        let handle = ClusterHandle::new("j-1").unwrap();
        api.fail_next("list_steps", "throttled");

        assert!(api.list_steps(&handle).await.is_err());
        assert!(api.list_steps(&handle).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_pages() {
        let storage = MockStorageApi::with_page_size(2);
        for name in ["a", "b", "c"] {
            storage.put_object("bucket", &format!("logs/{name}"), "x");
        }
        storage.put_object("bucket", "other/d", "x");

        let first = storage
            .list_objects_page("bucket", "logs/", None)
            .await
            .unwrap();
        assert_eq!(first.keys, vec!["logs/a", "logs/b"]);

        let second = storage
            .list_objects_page("bucket", "logs/", first.next)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["logs/c"]);
        assert_eq!(second.next, None);
    }
}
