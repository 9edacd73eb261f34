//! Historical records subject to retention.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A published container image version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRecord {
    /// Registry-side identifier used for deletion.
    pub id: String,
    pub repository: String,
    /// `None` for dangling (untagged) versions.
    pub tag: Option<String>,
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn is_tagged(&self) -> bool {
        self.tag.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// `repository:tag`, or `repository@digest` when untagged.
    pub fn reference(&self) -> String {
        match self.tag.as_deref().filter(|t| !t.is_empty()) {
            Some(tag) => format!("{}:{}", self.repository, tag),
            None => format!("{}@{}", self.repository, self.digest),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunRecordStatus {
    Queued,
    InProgress,
    Success,
    Failure,
    Cancelled,
    Skipped,
    Unknown,
}

/// One historical pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunRecord {
    pub id: String,
    pub status: RunRecordStatus,
    pub created_at: DateTime<Utc>,
}
