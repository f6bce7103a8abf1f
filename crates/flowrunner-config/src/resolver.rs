//! Template rendering and typed decoding of configuration files.
//!
//! A configuration file is a handlebars template. Rendering runs in strict
//! mode, so a variable referenced by the template but missing from the
//! variable map is an error rather than an empty string. Two helpers are
//! available inside templates:
//!
//! - `{{nowWithFormat "%Y-%m-%d"}}`: current UTC time in a `strftime` format
//! - `{{systemEnv "HOME"}}`: an environment variable, empty when unset
//!
//! The rendered text must be a self-describing envelope whose `schema` names
//! the expected record kind and whose `data` decodes into that record.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::Utc;
use flowrunner_core::{ClusterConfig, PlaybookConfig};
use handlebars::{handlebars_helper, Handlebars};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, Result};

const TEMPLATE_NAME: &str = "record";

handlebars_helper!(now_with_format: |format: str| {
    let mut out = String::new();
    // An invalid format renders as an empty string instead of aborting.
    if write!(out, "{}", Utc::now().format(format)).is_err() {
        out.clear();
    }
    out
});

handlebars_helper!(system_env: |name: str| std::env::var(name).unwrap_or_default());

/// The two kinds of configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A cluster record, consumed by `up`, `down` and `run-transient`.
    Cluster,
    /// A playbook record, consumed by `run`, `wait` and `run-transient`.
    Playbook,
}

impl RecordKind {
    /// Name of the record kind as it appears in schema URIs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cluster => "ClusterConfig",
            Self::Playbook => "PlaybookConfig",
        }
    }

    fn matches_schema(self, schema: &str) -> bool {
        schema.contains(&format!("/{}/", self.name()))
    }
}

#[derive(Deserialize)]
struct Envelope {
    schema: String,
    data: serde_json::Value,
}

/// Resolves configuration files into typed records.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    registry: Handlebars<'static>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigResolver {
    /// Create a resolver with strict rendering and the template helpers registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("nowWithFormat", Box::new(now_with_format));
        registry.register_helper("systemEnv", Box::new(system_env));
        Self { registry }
    }

    /// Read, render and decode a cluster record from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, rendered or decoded, or
    /// if the decoded record is missing a required field.
    pub fn resolve_cluster(
        &self,
        path: &Path,
        vars: &HashMap<String, String>,
    ) -> Result<ClusterConfig> {
        let raw = read(path)?;
        self.parse_cluster(&raw, vars)
    }

    /// Read, render and decode a playbook record from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, rendered or decoded, or
    /// if the decoded record is missing a required field.
    pub fn resolve_playbook(
        &self,
        path: &Path,
        vars: &HashMap<String, String>,
    ) -> Result<PlaybookConfig> {
        let raw = read(path)?;
        self.parse_playbook(&raw, vars)
    }

    /// Render and decode a cluster record from template text.
    ///
    /// # Errors
    ///
    /// See [`ConfigResolver::resolve_cluster`].
    pub fn parse_cluster(
        &self,
        raw: &str,
        vars: &HashMap<String, String>,
    ) -> Result<ClusterConfig> {
        let config: ClusterConfig = self.decode(raw, vars, RecordKind::Cluster)?;
        config.validate()?;
        Ok(config)
    }

    /// Render and decode a playbook record from template text.
    ///
    /// # Errors
    ///
    /// See [`ConfigResolver::resolve_playbook`].
    pub fn parse_playbook(
        &self,
        raw: &str,
        vars: &HashMap<String, String>,
    ) -> Result<PlaybookConfig> {
        let playbook: PlaybookConfig = self.decode(raw, vars, RecordKind::Playbook)?;
        playbook.validate()?;
        Ok(playbook)
    }

    /// Render `raw` as a template with `vars`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Template` for malformed templates and
    /// `ConfigError::Render` for missing variables or helper failures.
    pub fn render(&self, raw: &str, vars: &HashMap<String, String>) -> Result<String> {
        let mut registry = self.registry.clone();
        registry
            .register_template_string(TEMPLATE_NAME, raw)
            .map_err(|e| ConfigError::Template(Box::new(e)))?;
        registry
            .render(TEMPLATE_NAME, vars)
            .map_err(|e| ConfigError::Render(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(
        &self,
        raw: &str,
        vars: &HashMap<String, String>,
        kind: RecordKind,
    ) -> Result<T> {
        let rendered = self.render(raw, vars)?;
        let envelope: Envelope = serde_json::from_str(&rendered)?;

        if !kind.matches_schema(&envelope.schema) {
            return Err(ConfigError::SchemaMismatch {
                expected: kind.name(),
                found: envelope.schema,
            });
        }
        debug!(schema = %envelope.schema, "Decoding configuration record");

        Ok(serde_json::from_value(envelope.data)?)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrunner_core::CredentialsMode;
    use std::io::Write;

    const CLUSTER_TEMPLATE: &str = r#"{
      "schema": "iglu:com.snowplowanalytics.dataflowrunner/ClusterConfig/avro/1-0-0",
      "data": {
        "name": "{{name}}",
        "logUri": "s3://logging/",
        "region": "us-east-1",
        "credentials": { "accessKeyId": "env", "secretAccessKey": "env" },
        "roles": { "jobflow": "EMR_EC2_DefaultRole", "service": "EMR_DefaultRole" },
        "ec2": {
          "amiVersion": "4.5.0",
          "keyName": "snowplow-yyy-key",
          "location": { "vpc": { "subnetId": "subnet-123456" } },
          "instances": {
            "master": { "type": "m1.medium" },
            "core": { "type": "c3.4xlarge", "count": 3 },
            "task": { "type": "m1.medium", "count": 0, "bid": "0.015" }
          }
        }
      }
    }"#;

    const PLAYBOOK_TEMPLATE: &str = r#"{
      "schema": "iglu:com.snowplowanalytics.dataflowrunner/PlaybookConfig/avro/1-0-0",
      "data": {
        "region": "us-east-1",
        "credentials": { "accessKeyId": "{{key}}", "secretAccessKey": "{{key}}" },
        "steps": [
          {
            "type": "CUSTOM_JAR",
            "name": "Combine Months",
            "actionOnFailure": "CANCEL_AND_WAIT",
            "jar": "/usr/share/aws/emr/s3-dist-cp/lib/s3-dist-cp.jar",
            "arguments": [ "--src", "s3n://my-output-bucket/enriched/bad/" ]
          }
        ]
      }
    }"#;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn resolves_cluster_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLUSTER_TEMPLATE.as_bytes()).unwrap();

        let config = ConfigResolver::new()
            .resolve_cluster(file.path(), &vars(&[("name", "nightly")]))
            .unwrap();

        assert_eq!(config.name, "nightly");
        assert_eq!(config.ec2.instances.core.count, 3);
        assert_eq!(
            config.ec2.location.vpc.unwrap().subnet_id,
            "subnet-123456"
        );
    }

    #[test]
    fn missing_variable_fails_in_strict_mode() {
        let err = ConfigResolver::new()
            .parse_cluster(CLUSTER_TEMPLATE, &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Render(_)));
    }

    #[test]
    fn resolves_playbook_with_variables() {
        let playbook = ConfigResolver::new()
            .parse_playbook(PLAYBOOK_TEMPLATE, &vars(&[("key", "iam")]))
            .unwrap();

        assert_eq!(playbook.steps.len(), 1);
        assert_eq!(playbook.steps[0].name, "Combine Months");
        assert_eq!(playbook.credentials.resolve().unwrap(), CredentialsMode::Role);
    }

    #[test]
    fn schema_kind_must_match() {
        let err = ConfigResolver::new()
            .parse_cluster(PLAYBOOK_TEMPLATE, &vars(&[("key", "iam")]))
            .unwrap_err();
        match err {
            ConfigError::SchemaMismatch { expected, found } => {
                assert_eq!(expected, "ClusterConfig");
                assert!(found.contains("PlaybookConfig"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validation_runs_after_decoding() {
        let err = ConfigResolver::new()
            .parse_cluster(CLUSTER_TEMPLATE, &vars(&[("name", "")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "name cannot be empty");
    }

    #[test]
    fn values_are_not_html_escaped() {
        let rendered = ConfigResolver::new()
            .render("{{v}}", &vars(&[("v", "a&b<c>")]))
            .unwrap();
        assert_eq!(rendered, "a&b<c>");
    }

    #[test]
    fn helpers_render() {
        let resolver = ConfigResolver::new();

        let year = resolver
            .render("{{nowWithFormat \"%Y\"}}", &HashMap::new())
            .unwrap();
        assert_eq!(year, Utc::now().format("%Y").to_string());

        let unset = resolver
            .render(
                "[{{systemEnv \"FLOWRUNNER_SURELY_UNSET_VARIABLE\"}}]",
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(unset, "[]");
    }

    #[test]
    fn unreadable_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ConfigResolver::new()
            .resolve_playbook(&dir.path().join("missing.json"), &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_template_is_template_error() {
        let err = ConfigResolver::new()
            .render("{{#each items}}{{/if}}", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Template(_)));
    }
}
