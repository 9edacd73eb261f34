//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and the
//! external collaborators it drives: tools, artifact storage, version control,
//! the image registry and the run history.

use crate::artifact::{Artifact, ArtifactRef};
use crate::ids::{JobId, RunId};
use crate::records::{ImageRecord, RunRecord};
use crate::run::JobOutput;
use crate::trigger::TriggerContext;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Uniform interface for invoking any external step.
///
/// A non-zero `exit_code` in the response is a tool failure. An `Err` means
/// the tool could not be reached at all; the scheduler records both as job
/// failure.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse>;
}

/// Request handed to a tool adapter.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub run_id: RunId,
    pub job: JobId,
    pub tool: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub env: HashMap<String, String>,
    pub consumed: Vec<ConsumedArtifact>,
    pub trigger: Arc<TriggerContext>,
}

/// Artifact resolved for a consuming job.
#[derive(Debug, Clone)]
pub struct ConsumedArtifact {
    pub reference: ArtifactRef,
    pub data: Vec<u8>,
}

/// Artifact emitted by a tool, stored by the scheduler after the job succeeds.
#[derive(Debug, Clone)]
pub struct ProducedArtifact {
    pub name: String,
    pub data: Vec<u8>,
}

/// Response returned by a tool adapter.
#[derive(Debug, Clone, Default)]
pub struct ToolResponse {
    pub exit_code: i32,
    pub outputs: JobOutput,
    pub artifacts: Vec<ProducedArtifact>,
    /// Non-fatal problems surfaced to the run report.
    pub warnings: Vec<String>,
}

impl ToolResponse {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key, value);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.artifacts.push(ProducedArtifact {
            name: name.into(),
            data,
        });
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run-scoped handoff of build outputs between jobs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a blob produced by `producer` in `run_id`.
    async fn put(
        &self,
        run_id: RunId,
        producer: &JobId,
        name: &str,
        blob: Vec<u8>,
    ) -> Result<ArtifactRef>;

    /// Fetch a blob. Fails with `ArtifactNotFound` for refs of another run
    /// or purged artifacts.
    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>>;

    /// List artifacts stored for a run.
    async fn list(&self, run_id: RunId) -> Result<Vec<Artifact>>;

    /// Keep an artifact past the purge of its run.
    async fn promote(&self, reference: &ArtifactRef) -> Result<()>;

    /// Delete every non-promoted artifact of a run. Returns the number removed.
    async fn purge_run(&self, run_id: RunId) -> Result<usize>;
}

/// Identity used for commits made by the pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { sha: String },
    /// The working tree already matched; treated as success.
    NothingToCommit,
}

/// Version control operations needed by the deployment updater.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Stage `paths` and commit them.
    async fn commit(
        &self,
        paths: &[PathBuf],
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitOutcome>;

    /// Push the current branch.
    async fn push(&self, remote: &str, branch: Option<&str>) -> Result<()>;
}

/// Query/delete contract over published image versions.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn list_images(&self) -> Result<Vec<ImageRecord>>;

    async fn delete_image(&self, id: &str) -> Result<()>;
}

/// Query/delete contract over historical pipeline runs.
#[async_trait]
pub trait RunHistory: Send + Sync {
    async fn list_runs(&self) -> Result<Vec<RunRecord>>;

    async fn delete_run(&self, id: &str) -> Result<()>;
}
