//! Step log retrieval.
//!
//! Clusters upload compressed step logs under
//! `<log root>/<cluster>/steps/<step>/`. The retriever downloads everything
//! under that prefix into a scratch directory and returns the decompressed
//! files keyed by name without the `.gz` extension.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flowrunner_core::{ClusterHandle, StepId};
use url::Url;

use crate::api::{ClusterApi, StorageApi};
use crate::error::{ControlError, Result};

/// Where a cluster uploads its logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLocation {
    /// Storage bucket.
    pub bucket: String,
    /// Key prefix inside the bucket, without leading or trailing `/`.
    pub prefix: String,
}

impl LogLocation {
    /// Parse a cluster log URI such as `s3://bucket/some/prefix/`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::EmptyLogUri` for a missing or empty URI and
    /// `ControlError::InvalidLogUri` if it cannot be parsed.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let raw = raw.unwrap_or_default().trim();
        if raw.is_empty() {
            return Err(ControlError::EmptyLogUri);
        }

        let invalid = |reason: String| ControlError::InvalidLogUri {
            uri: raw.to_string(),
            reason,
        };
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing bucket".to_string()))?;

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: url.path().trim_matches('/').to_string(),
        })
    }

    /// The key prefix holding one step's logs, ending in `/`.
    #[must_use]
    pub fn step_prefix(&self, cluster: &ClusterHandle, step: &StepId) -> String {
        let segments = [self.prefix.as_str(), cluster.as_str(), "steps", step.as_str()];
        let mut prefix = segments
            .iter()
            .filter(|segment| !segment.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        prefix.push('/');
        prefix
    }
}

/// Downloads and decompresses step logs.
pub struct LogRetriever<C: ClusterApi, S: StorageApi> {
    cluster_api: Arc<C>,
    storage: Arc<S>,
}

impl<C: ClusterApi, S: StorageApi> LogRetriever<C, S> {
    /// Create a new log retriever.
    #[must_use]
    pub fn new(cluster_api: Arc<C>, storage: Arc<S>) -> Self {
        Self {
            cluster_api,
            storage,
        }
    }

    /// Find where a cluster uploads its logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the status call fails or the cluster has no
    /// usable log location.
    pub async fn locate_log_root(&self, cluster: &ClusterHandle) -> Result<LogLocation> {
        let description = self.cluster_api.describe_cluster(cluster).await?;
        LogLocation::parse(description.log_uri.as_deref())
    }

    /// Fetch the decompressed logs of one step, keyed by file name.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LogRetrieval` naming the stage that failed.
    pub async fn fetch_step_logs(
        &self,
        cluster: &ClusterHandle,
        step: &StepId,
    ) -> Result<BTreeMap<String, String>> {
        let location = self
            .locate_log_root(cluster)
            .await
            .map_err(ControlError::during("couldn't fetch log location"))?;

        let scratch = tempfile::Builder::new()
            .prefix(&format!("{cluster}-{step}"))
            .tempdir()
            .map_err(|e| ControlError::during("couldn't download step logs")(e.into()))?;

        let prefix = location.step_prefix(cluster, step);
        tracing::debug!(
            cluster = %cluster,
            step = %step,
            bucket = %location.bucket,
            prefix = %prefix,
            "Downloading step logs"
        );
        self.download_prefix(&location.bucket, &prefix, scratch.path())
            .await
            .map_err(ControlError::during("couldn't download step logs"))?;

        read_gzipped_dir(&scratch.path().join(&prefix))
            .map_err(ControlError::during("couldn't read gzipped log files"))
    }

    async fn download_prefix(&self, bucket: &str, prefix: &str, dest: &Path) -> Result<()> {
        let mut continuation = None;
        loop {
            let page = self
                .storage
                .list_objects_page(bucket, prefix, continuation)
                .await?;
            for key in &page.keys {
                let target = dest.join(key.trim_start_matches('/'));
                self.storage.download(bucket, key, &target).await?;
            }
            match page.next {
                Some(token) => continuation = Some(token),
                None => return Ok(()),
            }
        }
    }
}

fn read_gzipped_dir(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut logs = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let mut contents = String::new();
        GzDecoder::new(File::open(entry.path())?).read_to_string(&mut contents)?;

        let file_name = entry.file_name().to_string_lossy().into_owned();
        let name = file_name
            .strip_suffix(".gz")
            .map_or_else(|| file_name.clone(), str::to_string);
        logs.insert(name, contents);
    }
    Ok(logs)
}
