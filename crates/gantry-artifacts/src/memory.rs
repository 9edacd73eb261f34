//! In-memory artifact store.

use crate::keys::{digest, verify_digest};
use async_trait::async_trait;
use chrono::Utc;
use gantry_core::artifact::{Artifact, ArtifactRef, ArtifactRetention};
use gantry_core::ports::ArtifactStore;
use gantry_core::{Error, JobId, Result, RunId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

struct Entry {
    artifact: Artifact,
    data: Vec<u8>,
}

type RunArtifacts = HashMap<(JobId, String), Entry>;

/// Artifact store backed by a map guarded by an async `RwLock`.
#[derive(Default)]
pub struct MemoryArtifactStore {
    runs: RwLock<HashMap<RunId, RunArtifacts>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        run_id: RunId,
        producer: &JobId,
        name: &str,
        blob: Vec<u8>,
    ) -> Result<ArtifactRef> {
        let reference = ArtifactRef {
            run_id,
            producer: producer.clone(),
            name: name.to_string(),
            digest: digest(&blob),
            size_bytes: blob.len() as u64,
        };
        let entry = Entry {
            artifact: Artifact {
                reference: reference.clone(),
                retention: ArtifactRetention::Run,
                created_at: Utc::now(),
            },
            data: blob,
        };

        debug!(artifact = %reference, "Storing artifact in memory");
        self.runs
            .write()
            .await
            .entry(run_id)
            .or_default()
            .insert((producer.clone(), name.to_string()), entry);
        Ok(reference)
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(&reference.run_id)
            .and_then(|run| run.get(&(reference.producer.clone(), reference.name.clone())))
            .ok_or_else(|| Error::ArtifactNotFound(reference.to_string()))?;
        verify_digest(reference, &entry.data)?;
        Ok(entry.data.clone())
    }

    async fn list(&self, run_id: RunId) -> Result<Vec<Artifact>> {
        let runs = self.runs.read().await;
        let mut artifacts: Vec<Artifact> = runs
            .get(&run_id)
            .map(|run| run.values().map(|e| e.artifact.clone()).collect())
            .unwrap_or_default();
        artifacts.sort_by(|a, b| {
            (&a.reference.producer, &a.reference.name).cmp(&(&b.reference.producer, &b.reference.name))
        });
        Ok(artifacts)
    }

    async fn promote(&self, reference: &ArtifactRef) -> Result<()> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(&reference.run_id)
            .and_then(|run| run.get_mut(&(reference.producer.clone(), reference.name.clone())))
            .ok_or_else(|| Error::ArtifactNotFound(reference.to_string()))?;
        entry.artifact.retention = ArtifactRetention::Promoted;
        Ok(())
    }

    async fn purge_run(&self, run_id: RunId) -> Result<usize> {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(&run_id) else {
            return Ok(0);
        };
        let before = run.len();
        run.retain(|_, e| e.artifact.retention == ArtifactRetention::Promoted);
        let purged = before - run.len();
        if run.is_empty() {
            runs.remove(&run_id);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryArtifactStore::new();
        let run = RunId::new();
        let reference = store
            .put(run, &JobId::new("build"), "dist", b"bundle".to_vec())
            .await
            .unwrap();
        assert_eq!(reference.size_bytes, 6);
        assert_eq!(store.get(&reference).await.unwrap(), b"bundle".to_vec());
    }

    #[tokio::test]
    async fn test_reference_from_another_run_is_not_found() {
        let store = MemoryArtifactStore::new();
        let reference = store
            .put(RunId::new(), &JobId::new("build"), "dist", b"bundle".to_vec())
            .await
            .unwrap();

        let foreign = ArtifactRef {
            run_id: RunId::new(),
            ..reference
        };
        assert!(matches!(
            store.get(&foreign).await,
            Err(Error::ArtifactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_keeps_promoted() {
        let store = MemoryArtifactStore::new();
        let run = RunId::new();
        let dist = store
            .put(run, &JobId::new("build"), "dist", b"a".to_vec())
            .await
            .unwrap();
        let report = store
            .put(run, &JobId::new("test"), "coverage", b"b".to_vec())
            .await
            .unwrap();
        store.promote(&dist).await.unwrap();

        assert_eq!(store.purge_run(run).await.unwrap(), 1);
        assert!(store.get(&dist).await.is_ok());
        assert!(store.get(&report).await.is_err());
        assert_eq!(store.list(run).await.unwrap().len(), 1);
    }
}
