//! The built-in `gantry/cleanup` tool.

use crate::cleaner::{CleanupReport, RetentionCleaner};
use crate::github::{GithubClient, GithubPackageRegistry, GithubRunHistory};
use crate::policy::RetentionPolicy;
use async_trait::async_trait;
use gantry_core::pipeline::RetentionConfig;
use gantry_core::ports::{ImageRegistry, RunHistory, ToolAdapter, ToolRequest, ToolResponse};
use gantry_core::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable naming the run that must survive cleanup.
pub const EXCLUDE_RUN_ENV: &str = "GANTRY_CLEANUP_EXCLUDE_RUN";

/// Runs the retention cleaner as a pipeline job.
///
/// Never fails the job: listing and deletion failures become warnings on the
/// response. The first argument, or `GANTRY_CLEANUP_EXCLUDE_RUN`, names the
/// current run id in the run history.
pub struct CleanupTool {
    cleaner: RetentionCleaner,
    registry: Option<Arc<dyn ImageRegistry>>,
    history: Option<Arc<dyn RunHistory>>,
}

impl CleanupTool {
    pub fn new(cleaner: RetentionCleaner) -> Self {
        Self {
            cleaner,
            registry: None,
            history: None,
        }
    }

    /// Wire GitHub adapters for whichever targets the config names.
    pub fn from_config(config: &RetentionConfig, client: GithubClient) -> Self {
        let cleaner = RetentionCleaner::new(RetentionPolicy::from(config)).dry_run(config.dry_run);
        let mut tool = Self::new(cleaner);
        if let Some(target) = config.registry.clone() {
            tool = tool.with_registry(Arc::new(GithubPackageRegistry::new(client.clone(), target)));
        }
        if let Some(target) = config.runs.clone() {
            tool = tool.with_history(Arc::new(GithubRunHistory::new(client, target)));
        }
        tool
    }

    pub fn with_registry(mut self, registry: Arc<dyn ImageRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn RunHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Clean every configured target. Errors are folded into the report.
    pub async fn clean(&self, exclude: Option<&str>) -> (CleanupReport, Vec<String>) {
        let mut report = CleanupReport {
            dry_run: self.cleaner.dry_run_enabled(),
            ..CleanupReport::default()
        };
        let mut errors = Vec::new();

        if let Some(registry) = &self.registry {
            match self.cleaner.clean_images(registry.as_ref()).await {
                Ok(images) => report.merge(images),
                Err(e) => {
                    warn!(error = %e, "Image cleanup failed");
                    errors.push(format!("image cleanup failed: {}", e));
                }
            }
        }
        if let Some(history) = &self.history {
            match self.cleaner.clean_runs(history.as_ref(), exclude).await {
                Ok(runs) => report.merge(runs),
                Err(e) => {
                    warn!(error = %e, "Run cleanup failed");
                    errors.push(format!("run cleanup failed: {}", e));
                }
            }
        }
        (report, errors)
    }
}

#[async_trait]
impl ToolAdapter for CleanupTool {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
        let exclude = request
            .args
            .first()
            .cloned()
            .or_else(|| request.env.get(EXCLUDE_RUN_ENV).cloned())
            .filter(|id| !id.is_empty());

        let (report, errors) = self.clean(exclude.as_deref()).await;
        info!(
            kept = report.kept.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            dry_run = report.dry_run,
            "Retention cleanup finished"
        );

        let mut response = ToolResponse::success()
            .with_output("kept", report.kept.len().to_string())
            .with_output("deleted", report.deleted.len().to_string())
            .with_output("failed", report.failed.len().to_string());
        if let Ok(json) = serde_json::to_string(&report) {
            response = response.with_output("report", json);
        }
        for warning in report.warnings().into_iter().chain(errors) {
            response = response.with_warning(warning);
        }
        Ok(response)
    }
}
