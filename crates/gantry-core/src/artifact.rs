//! Artifact types.

use crate::ids::{JobId, RunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a blob stored by a producing job.
///
/// The digest is the hex sha-256 of the uncompressed blob; stores verify it
/// on every read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    pub run_id: RunId,
    pub producer: JobId,
    pub name: String,
    pub digest: String,
    pub size_bytes: u64,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.digest[..12.min(self.digest.len())];
        write!(f, "{}/{}/{}@{}", self.run_id, self.producer, self.name, short)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRetention {
    /// Removed when the run's artifacts are purged.
    #[default]
    Run,
    /// Survives the purge of its run.
    Promoted,
}

/// Stored artifact metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub retention: ArtifactRetention,
    pub created_at: DateTime<Utc>,
}
