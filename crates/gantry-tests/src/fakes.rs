//! In-process stand-ins for the external collaborators.

use async_trait::async_trait;
use gantry_core::ports::{
    CommitAuthor, CommitOutcome, ImageRegistry, RunHistory, ToolAdapter, ToolRequest, ToolResponse,
    VcsClient,
};
use gantry_core::records::{ImageRecord, RunRecord};
use gantry_core::{Error, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub job: String,
    pub tool: String,
    pub args: Vec<String>,
    pub consumed: Vec<String>,
}

/// Plays the part of the external build tools, keyed on job name:
///
/// - `build` produces a `dist` artifact
/// - `docker` requires the consumed `dist` artifact and publishes its last
///   argument as the `image` output
/// - jobs listed with [`ScriptedTools::failing`] exit with code 1
/// - everything else succeeds without outputs
#[derive(Debug, Default)]
pub struct ScriptedTools {
    failing: HashSet<String>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(jobs.into_iter().map(Into::into));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    pub fn invoked_jobs(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.job).collect()
    }
}

#[async_trait]
impl ToolAdapter for ScriptedTools {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
        let job = request.job.as_str().to_string();
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(Invocation {
                job: job.clone(),
                tool: request.tool.clone(),
                args: request.args.clone(),
                consumed: request
                    .consumed
                    .iter()
                    .map(|c| c.reference.name.clone())
                    .collect(),
            });
        }

        if self.failing.contains(&job) {
            return Ok(ToolResponse::failure(1));
        }

        match job.as_str() {
            "build" => Ok(ToolResponse::success().with_artifact("dist", b"console.log('app')".to_vec())),
            "docker" => {
                let has_dist = request
                    .consumed
                    .iter()
                    .any(|c| c.reference.name == "dist" && !c.data.is_empty());
                let Some(image) = request.args.last().filter(|_| has_dist) else {
                    return Ok(ToolResponse::failure(2));
                };
                Ok(ToolResponse::success().with_output("image", image.clone()))
            }
            _ => Ok(ToolResponse::success()),
        }
    }
}

/// Version control that records commits instead of writing history.
#[derive(Debug, Default)]
pub struct RecordingVcs {
    commits: Mutex<Vec<RecordedCommit>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub sha: String,
    pub paths: Vec<PathBuf>,
    pub message: String,
    pub author: CommitAuthor,
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VcsClient for RecordingVcs {
    async fn commit(
        &self,
        paths: &[PathBuf],
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitOutcome> {
        let mut commits = self
            .commits
            .lock()
            .map_err(|_| Error::Vcs("commit log poisoned".into()))?;
        let sha = format!("{:040x}", commits.len() + 1);
        commits.push(RecordedCommit {
            sha: sha.clone(),
            paths: paths.to_vec(),
            message: message.to_string(),
            author: author.clone(),
        });
        Ok(CommitOutcome::Committed { sha })
    }

    async fn push(&self, _remote: &str, _branch: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Registry holding a fixed set of image versions.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    images: Mutex<Vec<ImageRecord>>,
    refuse: HashSet<String>,
    deleted: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new(images: Vec<ImageRecord>) -> Self {
        Self {
            images: Mutex::new(images),
            ..Self::default()
        }
    }

    /// Deleting any of `ids` fails with a registry error.
    pub fn refusing<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refuse.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> Vec<ImageRecord> {
        self.images.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.remaining())
    }

    async fn delete_image(&self, id: &str) -> Result<()> {
        if self.refuse.contains(id) {
            return Err(Error::Registry(format!("deleting {} is forbidden", id)));
        }
        if let Ok(mut images) = self.images.lock() {
            images.retain(|i| i.id != id);
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(id.to_string());
        }
        Ok(())
    }
}

/// Run history holding a fixed set of runs.
#[derive(Debug, Default)]
pub struct FakeHistory {
    runs: Mutex<Vec<RunRecord>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeHistory {
    pub fn new(runs: Vec<RunRecord>) -> Self {
        Self {
            runs: Mutex::new(runs),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RunHistory for FakeHistory {
    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self.runs.lock().map(|r| r.clone()).unwrap_or_default())
    }

    async fn delete_run(&self, id: &str) -> Result<()> {
        if let Ok(mut runs) = self.runs.lock() {
            runs.retain(|r| r.id != id);
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(id.to_string());
        }
        Ok(())
    }
}
