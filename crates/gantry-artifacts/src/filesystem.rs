//! Filesystem-backed artifact store.
//!
//! Layout: `<root>/<run>/<job>/<name>` holds the compressed blob and
//! `<root>/<run>/<job>/<name>.meta.json` its metadata.

use crate::compression::{CompressionType, compress, decompress};
use crate::keys::{digest, sanitize_key, verify_digest};
use async_trait::async_trait;
use chrono::Utc;
use gantry_core::artifact::{Artifact, ArtifactRef, ArtifactRetention};
use gantry_core::ports::ArtifactStore;
use gantry_core::{Error, JobId, Result, RunId};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    artifact: Artifact,
    compression: CompressionType,
}

pub struct FilesystemArtifactStore {
    root_dir: PathBuf,
    compression: CompressionType,
}

impl FilesystemArtifactStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            compression: CompressionType::Zstd,
        }
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root_dir.join(run_id.to_string())
    }

    fn blob_path(&self, run_id: RunId, producer: &JobId, name: &str) -> PathBuf {
        self.run_dir(run_id)
            .join(sanitize_key(producer.as_str()))
            .join(sanitize_key(name))
    }

    fn meta_path(blob: &Path) -> PathBuf {
        let mut path = blob.as_os_str().to_owned();
        path.push(META_SUFFIX);
        PathBuf::from(path)
    }

    async fn read_metadata(path: &Path) -> Result<Metadata> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_metadata(path: &Path, metadata: &Metadata) -> Result<()> {
        let raw = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }

    /// Every metadata file under a run directory.
    async fn metadata_files(&self, run_id: RunId) -> Result<Vec<PathBuf>> {
        let run_dir = self.run_dir(run_id);
        let mut files = Vec::new();
        let mut jobs = match tokio::fs::read_dir(&run_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(job_dir) = jobs.next_entry().await? {
            if !job_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(job_dir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().ends_with(META_SUFFIX) {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
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

        let path = self.blob_path(run_id, producer, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Internal(format!("Failed to create artifact dir: {}", e))
            })?;
        }

        let compression = self.compression;
        let compressed = tokio::task::spawn_blocking(move || compress(&blob, compression))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        tokio::fs::write(&path, &compressed).await?;

        let metadata = Metadata {
            artifact: Artifact {
                reference: reference.clone(),
                retention: ArtifactRetention::Run,
                created_at: Utc::now(),
            },
            compression,
        };
        Self::write_metadata(&Self::meta_path(&path), &metadata).await?;

        debug!(
            artifact = %reference,
            stored_bytes = compressed.len(),
            path = %path.display(),
            "Stored artifact"
        );
        Ok(reference)
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.blob_path(reference.run_id, &reference.producer, &reference.name);
        let metadata = match Self::read_metadata(&Self::meta_path(&path)).await {
            Ok(metadata) => metadata,
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ArtifactNotFound(reference.to_string()));
            }
            Err(e) => return Err(e),
        };

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ArtifactNotFound(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let compression = metadata.compression;
        let data = tokio::task::spawn_blocking(move || decompress(&raw, compression))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        verify_digest(reference, &data)?;
        Ok(data)
    }

    async fn list(&self, run_id: RunId) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for path in self.metadata_files(run_id).await? {
            artifacts.push(Self::read_metadata(&path).await?.artifact);
        }
        Ok(artifacts)
    }

    async fn promote(&self, reference: &ArtifactRef) -> Result<()> {
        let path = Self::meta_path(&self.blob_path(
            reference.run_id,
            &reference.producer,
            &reference.name,
        ));
        let mut metadata = match Self::read_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ArtifactNotFound(reference.to_string()));
            }
            Err(e) => return Err(e),
        };
        metadata.artifact.retention = ArtifactRetention::Promoted;
        Self::write_metadata(&path, &metadata).await
    }

    async fn purge_run(&self, run_id: RunId) -> Result<usize> {
        let mut purged = 0;
        let mut kept = 0;
        for meta in self.metadata_files(run_id).await? {
            let metadata = Self::read_metadata(&meta).await?;
            if metadata.artifact.retention == ArtifactRetention::Promoted {
                kept += 1;
                continue;
            }
            let blob = meta.with_file_name(sanitize_key(&metadata.artifact.reference.name));
            if let Err(e) = tokio::fs::remove_file(&blob).await
                && e.kind() != ErrorKind::NotFound
            {
                return Err(e.into());
            }
            tokio::fs::remove_file(&meta).await?;
            purged += 1;
        }

        if kept == 0 {
            match tokio::fs::remove_dir_all(self.run_dir(run_id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(run = %run_id, error = %e, "Failed to remove run directory"),
            }
        }
        Ok(purged)
    }
}
