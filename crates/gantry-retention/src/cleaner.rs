//! Best-effort deletion driven by a retention policy.

use crate::policy::RetentionPolicy;
use futures::stream::{self, StreamExt};
use gantry_core::ports::{ImageRegistry, RunHistory};
use gantry_core::Result;
use serde::Serialize;
use tracing::{info, warn};

/// Deletions in flight against one backend.
const DELETE_CONCURRENCY: usize = 4;

/// Per-record outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub kept: Vec<String>,
    /// Deleted ids, or ids that would be deleted in dry-run mode.
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub dry_run: bool,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.kept.extend(other.kept);
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
        self.dry_run |= other.dry_run;
    }

    /// Failures rendered for the run report.
    pub fn warnings(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(id, error)| format!("failed to delete {}: {}", id, error))
            .collect()
    }
}

/// Applies a [`RetentionPolicy`] to a registry and a run history.
#[derive(Debug, Clone, Default)]
pub struct RetentionCleaner {
    policy: RetentionPolicy,
    dry_run: bool,
}

impl RetentionCleaner {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            dry_run: false,
        }
    }

    /// Compute the report without deleting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn dry_run_enabled(&self) -> bool {
        self.dry_run
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Trim image versions. Only a failing listing is an error; individual
    /// deletion failures land in the report.
    pub async fn clean_images(&self, registry: &dyn ImageRegistry) -> Result<CleanupReport> {
        let selection = self.policy.select_images(registry.list_images().await?);
        let kept = selection.keep.into_iter().map(|i| i.id).collect();
        let doomed = selection
            .delete
            .into_iter()
            .map(|image| {
                let label = image.reference();
                (image.id, label)
            })
            .collect();
        Ok(self
            .delete_all("image", kept, doomed, |id: String| async move {
                registry.delete_image(&id).await
            })
            .await)
    }

    /// Trim run history, never touching `exclude`.
    pub async fn clean_runs(&self, history: &dyn RunHistory, exclude: Option<&str>) -> Result<CleanupReport> {
        let selection = self.policy.select_runs(history.list_runs().await?, exclude);
        let kept = selection.keep.into_iter().map(|r| r.id).collect();
        let doomed = selection
            .delete
            .into_iter()
            .map(|run| {
                let label = format!("{:?} run created {}", run.status, run.created_at);
                (run.id, label)
            })
            .collect();
        Ok(self
            .delete_all("run", kept, doomed, |id: String| async move {
                history.delete_run(&id).await
            })
            .await)
    }

    /// Issue every deletion, at most `DELETE_CONCURRENCY` at a time. The
    /// report keeps the order of `doomed`.
    async fn delete_all<F, Fut>(
        &self,
        kind: &str,
        kept: Vec<String>,
        doomed: Vec<(String, String)>,
        delete: F,
    ) -> CleanupReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut report = CleanupReport {
            kept,
            dry_run: self.dry_run,
            ..CleanupReport::default()
        };

        if self.dry_run {
            for (id, label) in doomed {
                info!(kind, %id, %label, "Would delete");
                report.deleted.push(id);
            }
            return report;
        }

        let outcomes: Vec<_> = stream::iter(doomed)
            .map(|(id, label)| {
                let attempt = delete(id.clone());
                async move { (id, label, attempt.await) }
            })
            .buffered(DELETE_CONCURRENCY)
            .collect()
            .await;

        for (id, label, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    info!(kind, %id, %label, "Deleted");
                    report.deleted.push(id);
                }
                Err(e) => {
                    warn!(kind, %id, %label, error = %e, "Failed to delete");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use gantry_core::records::{ImageRecord, RunRecord, RunRecordStatus};
    use gantry_core::Error;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FakeRegistry {
        images: Vec<ImageRecord>,
        refuse: Vec<&'static str>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageRegistry for FakeRegistry {
        async fn list_images(&self) -> Result<Vec<ImageRecord>> {
            Ok(self.images.clone())
        }

        async fn delete_image(&self, id: &str) -> Result<()> {
            if self.refuse.iter().any(|r| *r == id) {
                return Err(Error::Registry(format!("403 deleting {}", id)));
            }
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    struct FakeHistory {
        runs: Vec<RunRecord>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RunHistory for FakeHistory {
        async fn list_runs(&self) -> Result<Vec<RunRecord>> {
            Ok(self.runs.clone())
        }

        async fn delete_run(&self, id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ImageRegistry for Unreachable {
        async fn list_images(&self) -> Result<Vec<ImageRecord>> {
            Err(Error::Network("connection refused".into()))
        }

        async fn delete_image(&self, _id: &str) -> Result<()> {
            unreachable!()
        }
    }

    fn image(id: &str, hours: i64) -> ImageRecord {
        ImageRecord {
            id: id.into(),
            repository: "ghcr.io/org/repo".into(),
            tag: Some(format!("v{}", id)),
            digest: format!("sha256:{}", id),
            created_at: DateTime::<Utc>::UNIX_EPOCH + Duration::hours(hours),
        }
    }

    fn registry(refuse: Vec<&'static str>) -> FakeRegistry {
        FakeRegistry {
            images: (1..=5).map(|i| image(&i.to_string(), i)).collect(),
            refuse,
            deleted: Mutex::new(vec![]),
        }
    }

    #[tokio::test]
    async fn test_deletes_three_oldest_of_five() {
        let registry = registry(vec![]);
        let report = RetentionCleaner::new(RetentionPolicy::new(2))
            .clean_images(&registry)
            .await
            .unwrap();

        assert_eq!(report.kept, vec!["5", "4"]);
        assert_eq!(report.deleted, vec!["3", "2", "1"]);
        assert!(report.is_clean());
        assert_eq!(*registry.deleted.lock().unwrap(), vec!["3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_partial_failure_attempts_every_deletion() {
        let registry = registry(vec!["2"]);
        let report = RetentionCleaner::new(RetentionPolicy::new(2))
            .clean_images(&registry)
            .await
            .unwrap();

        assert_eq!(report.deleted, vec!["3", "1"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2");
        assert_eq!(report.warnings(), vec!["failed to delete 2: Registry error: 403 deleting 2"]);
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let registry = registry(vec![]);
        let report = RetentionCleaner::new(RetentionPolicy::new(2))
            .dry_run(true)
            .clean_images(&registry)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.deleted.len(), 3);
        assert!(registry.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_error() {
        let result = RetentionCleaner::default().clean_images(&Unreachable).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_runs_keep_current() {
        let history = FakeHistory {
            runs: (1..=4)
                .map(|i| RunRecord {
                    id: format!("run-{}", i),
                    status: RunRecordStatus::Success,
                    created_at: DateTime::<Utc>::UNIX_EPOCH + Duration::hours(i),
                })
                .collect(),
            deleted: Mutex::new(vec![]),
        };
        let mut report = RetentionCleaner::new(RetentionPolicy::new(2))
            .clean_runs(&history, Some("run-1"))
            .await
            .unwrap();

        assert_eq!(report.kept, vec!["run-4", "run-3", "run-1"]);
        assert_eq!(*history.deleted.lock().unwrap(), vec!["run-2"]);

        report.merge(CleanupReport {
            failed: vec![("x".into(), "boom".into())],
            ..CleanupReport::default()
        });
        assert!(!report.is_clean());
    }
}
