//! Run and job execution results.

use crate::artifact::ArtifactRef;
use crate::ids::{JobId, RunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outputs published by one job execution.
///
/// Built while the job runs (a repeated key overwrites the earlier value)
/// and frozen behind an `Arc` once the job completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobOutput(BTreeMap<String, String>);

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobOutput {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The job's own gate evaluated to false.
    Gated,
    /// An upstream job failed or was skipped.
    DependencyNotMet { dependency: JobId },
    /// The run was cancelled before the job started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Gated => write!(f, "condition not met"),
            SkipReason::DependencyNotMet { dependency } => {
                write!(f, "dependency '{}' did not succeed", dependency)
            }
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The tool ran and returned non-success.
    ExitCode { code: i32 },
    /// The job exceeded its timeout.
    Timeout { seconds: u64 },
    /// The tool could not be invoked at all.
    Adapter { message: String },
    /// A consumed or produced artifact could not be handed over.
    Artifact { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitCode { code } => write!(f, "exited with code {}", code),
            FailureReason::Timeout { seconds } => write!(f, "timed out after {}s", seconds),
            FailureReason::Adapter { message } => write!(f, "tool error: {}", message),
            FailureReason::Artifact { message } => write!(f, "artifact error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed(FailureReason),
    Skipped(SkipReason),
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobStatus::Skipped(_))
    }
}

/// Outcome of one job within a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub job: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub outputs: JobOutput,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Number of attempts made; zero for skipped jobs.
    #[serde(default)]
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl JobResult {
    pub fn skipped(job: JobId, reason: SkipReason) -> Self {
        Self {
            job,
            status: JobStatus::Skipped(reason),
            outputs: JobOutput::default(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            attempts: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
    /// The trigger did not match; no job was scheduled.
    Skipped,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Skipped)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Summary of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub jobs: Vec<JobResult>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Report for a run whose trigger was filtered out.
    pub fn gated_out(run_id: RunId) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::Skipped,
            jobs: Vec::new(),
            warnings: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.job.as_str() == name)
    }

    pub fn count(&self, predicate: impl Fn(&JobStatus) -> bool) -> usize {
        self.jobs.iter().filter(|j| predicate(&j.status)).count()
    }
}
