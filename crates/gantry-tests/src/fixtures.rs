//! Test fixtures for creating sample data.

use crate::fakes::{FakeHistory, FakeRegistry, RecordingVcs, ScriptedTools};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use gantry_artifacts::MemoryArtifactStore;
use gantry_core::pipeline::{CLEANUP_TOOL, DEPLOY_TOOL, PipelineDefinition};
use gantry_core::records::{ImageRecord, RunRecord, RunRecordStatus};
use gantry_core::run::RunReport;
use gantry_core::trigger::{EventKind, TriggerContext};
use gantry_deploy::DeployTool;
use gantry_retention::{CleanupTool, RetentionCleaner, RetentionPolicy};
use gantry_runner::ToolRouter;
use gantry_scheduler::{CancelSignal, ExecutorConfig, RunExecutor, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Relative path of the deployment descriptor in fixture repositories.
pub const DESCRIPTOR_PATH: &str = "kubernetes/deployment.yaml";

/// A pipeline that tests, builds, publishes an image, deploys it and trims
/// history.
pub const WEB_PIPELINE: &str = r#"
version: "1"
name: web
triggers:
  - type: push
    branches: [main]
deploy:
  image_repository: ghcr.io/org/repo
retention:
  keep_last: 2
jobs:
  - name: test
    tool: npm
    args: [test]
  - name: lint
    tool: npm
    args: [run, lint]
  - name: build
    needs: [test, lint]
    tool: npm
    args: [run, build]
    produces: [dist]
  - name: docker
    needs: [build]
    tool: docker
    args: [build, --push, -t, "ghcr.io/org/repo:sha-${{ trigger.short_sha }}"]
    consumes:
      - { job: build, name: dist }
    outputs: [image]
  - name: deploy
    needs: [docker]
    tool: gantry/deploy
    args: ["${{ needs.docker.outputs.image }}"]
    outputs: [changed, image, commit]
  - name: cleanup
    needs: [deploy]
    always: true
    tool: gantry/cleanup
    outputs: [kept, deleted, failed]
"#;

/// Descriptor as committed before the first deploy.
pub const DESCRIPTOR: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: web
          image: ghcr.io/org/repo:sha-000000
          ports:
            - containerPort: 8080
";

pub struct PipelineFixture;

impl PipelineFixture {
    pub fn web() -> PipelineDefinition {
        Self::parse(WEB_PIPELINE)
    }

    pub fn parse(yaml: &str) -> PipelineDefinition {
        serde_yaml::from_str(yaml).unwrap_or_else(|e| panic!("invalid fixture pipeline: {}", e))
    }
}

pub struct TriggerFixture;

impl TriggerFixture {
    /// Push to main at commit `abc123` touching `paths`.
    pub fn push_main<I, S>(paths: I) -> TriggerContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TriggerContext::new(EventKind::Push, "refs/heads/main", "abc123")
            .with_changed_paths(paths)
            .with_commit_message("feat: new landing page")
            .with_actor("dev")
    }
}

pub struct RecordFixture;

impl RecordFixture {
    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000) + Duration::hours(hours)
    }

    /// Five tagged versions `v1`..`v5` (ids `1`..`5`, oldest first) plus
    /// one dangling version with id `dangling`.
    pub fn images() -> Vec<ImageRecord> {
        let mut images: Vec<ImageRecord> = (1..=5)
            .map(|i| ImageRecord {
                id: i.to_string(),
                repository: "ghcr.io/org/repo".into(),
                tag: Some(format!("v{}", i)),
                digest: format!("sha256:{:064}", i),
                created_at: Self::at(i),
            })
            .collect();
        images.push(ImageRecord {
            id: "dangling".into(),
            repository: "ghcr.io/org/repo".into(),
            tag: None,
            digest: format!("sha256:{:064}", 0),
            created_at: Self::at(10),
        });
        images
    }

    /// Four finished runs, `run-1` oldest.
    pub fn runs() -> Vec<RunRecord> {
        (1..=4)
            .map(|i| RunRecord {
                id: format!("run-{}", i),
                status: if i == 2 {
                    RunRecordStatus::Failure
                } else {
                    RunRecordStatus::Success
                },
                created_at: Self::at(i),
            })
            .collect()
    }
}

/// A fixture repository plus fakes for everything the pipeline touches.
pub struct Harness {
    pub repo: TempDir,
    pub definition: PipelineDefinition,
    pub tools: Arc<ScriptedTools>,
    pub vcs: Arc<RecordingVcs>,
    pub registry: Arc<FakeRegistry>,
    pub history: Arc<FakeHistory>,
    pub store: Arc<MemoryArtifactStore>,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_parts(
            PipelineFixture::web(),
            ScriptedTools::new(),
            FakeRegistry::new(RecordFixture::images()),
        )
    }

    pub fn with_parts(
        definition: PipelineDefinition,
        tools: ScriptedTools,
        registry: FakeRegistry,
    ) -> Result<Self> {
        let repo = tempfile::tempdir()?;
        let descriptor = repo.path().join(DESCRIPTOR_PATH);
        if let Some(parent) = descriptor.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&descriptor, DESCRIPTOR)?;

        Ok(Self {
            repo,
            definition,
            tools: Arc::new(tools),
            vcs: Arc::new(RecordingVcs::new()),
            registry: Arc::new(registry),
            history: Arc::new(FakeHistory::new(RecordFixture::runs())),
            store: Arc::new(MemoryArtifactStore::new()),
        })
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.repo.path().join(DESCRIPTOR_PATH)
    }

    pub fn descriptor(&self) -> Result<String> {
        std::fs::read_to_string(self.descriptor_path()).context("reading descriptor")
    }

    /// Scheduler wired the way the binary wires it, with fakes at the edges.
    pub fn scheduler(&self) -> Result<Scheduler> {
        let mut router = ToolRouter::new().fallback(self.tools.clone());

        if let Some(deploy) = &self.definition.deploy {
            let tool = DeployTool::new(deploy.clone(), self.vcs.clone(), self.repo.path())?;
            router = router.route(DEPLOY_TOOL, Arc::new(tool));
        }

        let policy = self
            .definition
            .retention
            .as_ref()
            .map(RetentionPolicy::from)
            .unwrap_or_default();
        let cleanup = CleanupTool::new(RetentionCleaner::new(policy))
            .with_registry(self.registry.clone())
            .with_history(self.history.clone());
        router = router.route(CLEANUP_TOOL, Arc::new(cleanup));

        let executor = RunExecutor::new(Arc::new(router), self.store.clone()).with_config(ExecutorConfig {
            workspace: self.repo.path().to_path_buf(),
            ..ExecutorConfig::default()
        });
        Ok(Scheduler::new(&self.definition, executor)?)
    }

    pub async fn run(&self, ctx: TriggerContext) -> Result<RunReport> {
        Ok(self.scheduler()?.handle_trigger(ctx, CancelSignal::never()).await?)
    }
}
