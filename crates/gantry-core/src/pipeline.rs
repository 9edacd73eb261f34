//! Pipeline definition types.
//!
//! These types represent the user-authored `gantry.yaml` configuration. They
//! are plain data; turning them into a schedulable DAG is the scheduler's job.

use crate::trigger::EventKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Tool identifier of the built-in deployment updater.
pub const DEPLOY_TOOL: &str = "gantry/deploy";
/// Tool identifier of the built-in retention cleaner.
pub const CLEANUP_TOOL: &str = "gantry/cleanup";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobDefinition>,
    #[serde(default)]
    pub deploy: Option<DeployConfig>,
    #[serde(default)]
    pub retention: Option<RetentionConfig>,
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u32,
    /// Upper bound on concurrently executing jobs. Unbounded when absent.
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

fn default_timeout() -> u32 {
    60
}

impl PipelineDefinition {
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Jobs that invoke the built-in deployment updater.
    pub fn deploy_jobs(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().filter(|j| j.tool == DEPLOY_TOOL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub event: EventKind,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(rename = "if", default)]
    pub condition: Option<JobCondition>,
    /// Run even when an upstream job failed or was skipped.
    #[serde(default)]
    pub always: bool,
    pub tool: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Output keys this job publishes to its dependents.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Artifact names this job produces.
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<ArtifactDependency>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// Declarative gate evaluated against the trigger context.
///
/// Every populated field must match; an empty condition always passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobCondition {
    #[serde(default)]
    pub events: Vec<EventKind>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_ignore: Vec<String>,
    /// Expression such as `${{ trigger.branch }} == main`.
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDependency {
    pub job: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay")]
    pub delay_seconds: u32,
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay(),
            exponential_backoff: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}
fn default_delay() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

/// Settings for the built-in deployment updater.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeployConfig {
    /// Manifest path relative to the repository root.
    #[serde(default = "default_descriptor")]
    pub descriptor: PathBuf,
    /// `<registry>/<repository>` prefix whose tag gets replaced.
    pub image_repository: String,
    /// Commit-message marker that stops the pipeline re-triggering itself.
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

fn default_descriptor() -> PathBuf {
    PathBuf::from("kubernetes/deployment.yaml")
}
fn default_marker() -> String {
    "[skip ci]".to_string()
}
fn default_author_name() -> String {
    "gantry-bot".to_string()
}
fn default_author_email() -> String {
    "gantry-bot@users.noreply.github.com".to_string()
}

/// Settings for the built-in retention cleaner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetentionConfig {
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,
    #[serde(default = "default_true")]
    pub delete_untagged: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub registry: Option<RegistryTarget>,
    #[serde(default)]
    pub runs: Option<RunHistoryTarget>,
}

fn default_keep_last() -> usize {
    2
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_last: default_keep_last(),
            delete_untagged: true,
            dry_run: false,
            registry: None,
            runs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegistryTarget {
    pub owner: String,
    pub package: String,
    #[serde(default)]
    pub owner_kind: OwnerKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    #[default]
    Org,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunHistoryTarget {
    pub owner: String,
    pub repo: String,
    /// Workflow file name or numeric id.
    pub workflow: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
version: "1"
name: web
triggers:
  - type: push
    branches: [main]
    paths_ignore: ["kubernetes/deployment.yaml"]
jobs:
  - name: test
    tool: npm
    args: [test]
  - name: build
    needs: [test]
    tool: npm
    args: [run, build]
    produces: [dist]
  - name: docker
    needs: [build]
    if:
      events: [push]
      branches: [main]
    tool: docker
    consumes:
      - job: build
        name: dist
    outputs: [image]
deploy:
  image_repository: ghcr.io/org/repo
retention:
  keep_last: 3
"#;

    #[test]
    fn test_parse_pipeline_defaults() {
        let def: PipelineDefinition = serde_yaml::from_str(PIPELINE).unwrap();
        assert_eq!(def.jobs.len(), 3);
        assert_eq!(def.timeout_minutes, 60);

        let docker = def.job("docker").unwrap();
        let cond = docker.condition.as_ref().unwrap();
        assert_eq!(cond.events, vec![EventKind::Push]);
        assert_eq!(docker.consumes[0].name, "dist");
        assert!(!docker.always);

        let deploy = def.deploy.unwrap();
        assert_eq!(deploy.marker, "[skip ci]");
        assert_eq!(deploy.descriptor, PathBuf::from("kubernetes/deployment.yaml"));

        let retention = def.retention.unwrap();
        assert_eq!(retention.keep_last, 3);
        assert!(retention.delete_untagged);
    }
}
