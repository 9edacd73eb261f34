//! Main scheduler orchestration.

use crate::dag::{DagBuilder, PipelineDag};
use crate::executor::{CancelSignal, RunExecutor};
use crate::job::Job;
use crate::plan::{ExecutionPlan, plan, validate_contracts};
use crate::triggers::{TriggerDecision, TriggerMatcher};

use gantry_core::loop_guard::LoopGuard;
use gantry_core::pipeline::{DEPLOY_TOOL, PipelineDefinition};
use gantry_core::run::RunReport;
use gantry_core::trigger::TriggerContext;
use gantry_core::{Error, Result, RunId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The main scheduler service: decides whether a trigger starts a run,
/// plans it, and drives it to completion.
pub struct Scheduler {
    name: String,
    dag: Arc<PipelineDag>,
    trigger_matcher: TriggerMatcher,
    variables: HashMap<String, String>,
    executor: RunExecutor,
}

impl Scheduler {
    /// Build a scheduler for a pipeline definition. The definition's
    /// `max_parallel` and `timeout_minutes` override the executor defaults.
    pub fn new(definition: &PipelineDefinition, executor: RunExecutor) -> Result<Self> {
        let loop_guard = validate(definition)?;
        let jobs = definition.jobs.iter().map(Job::from_definition).collect();

        let mut config = executor.config().clone();
        config.max_parallel = definition.max_parallel.or(config.max_parallel);
        config.default_timeout = Duration::from_secs(u64::from(definition.timeout_minutes) * 60);

        Self::from_jobs(
            definition.name.clone(),
            jobs,
            TriggerMatcher::new(definition.triggers.clone(), loop_guard),
            executor.with_config(config),
        )
        .map(|s| s.with_variables(definition.variables.clone()))
    }

    /// Build a scheduler from already constructed jobs.
    pub fn from_jobs(
        name: impl Into<String>,
        jobs: Vec<Job>,
        trigger_matcher: TriggerMatcher,
        executor: RunExecutor,
    ) -> Result<Self> {
        let dag = DagBuilder::new().build(jobs)?;
        validate_contracts(&dag)?;
        Ok(Self {
            name: name.into(),
            dag: Arc::new(dag),
            trigger_matcher,
            variables: HashMap::new(),
            executor,
        })
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dag(&self) -> &PipelineDag {
        &self.dag
    }

    pub fn loop_guard(&self) -> Option<&LoopGuard> {
        self.trigger_matcher.loop_guard()
    }

    /// Plan a run for `ctx`. Returns `None` when the trigger is ignored.
    pub fn plan(&self, ctx: TriggerContext) -> Result<Option<ExecutionPlan>> {
        if let TriggerDecision::Ignored(reason) = self.trigger_matcher.decide(&ctx) {
            info!(pipeline = %self.name, %reason, sha = %ctx.sha, "Trigger ignored");
            return Ok(None);
        }
        plan(self.dag.clone(), Arc::new(ctx), self.variables.clone()).map(Some)
    }

    /// Handle a trigger event end to end.
    pub async fn handle_trigger(&self, ctx: TriggerContext, cancel: CancelSignal) -> Result<RunReport> {
        match self.plan(ctx)? {
            Some(plan) => self.executor.execute(&plan, cancel).await,
            None => Ok(RunReport::gated_out(RunId::new())),
        }
    }
}

/// Validate a pipeline definition without running it.
///
/// Returns the loop guard derived from the `deploy` section, if any.
pub fn validate(definition: &PipelineDefinition) -> Result<Option<LoopGuard>> {
    if definition.jobs.is_empty() {
        return Err(Error::InvalidPipeline("pipeline defines no jobs".into()));
    }

    let has_deploy_job = definition.jobs.iter().any(|j| j.tool == DEPLOY_TOOL);
    let loop_guard = match &definition.deploy {
        Some(config) => Some(LoopGuard::from_config(config)?),
        None if has_deploy_job => {
            return Err(Error::LoopGuard(format!(
                "a job uses '{}' but the pipeline has no deploy section",
                DEPLOY_TOOL
            )));
        }
        None => None,
    };

    let jobs = definition.jobs.iter().map(Job::from_definition).collect();
    let dag = DagBuilder::new().build(jobs)?;
    validate_contracts(&dag)?;

    Ok(loop_guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_artifacts::MemoryArtifactStore;
    use gantry_core::ports::{ToolAdapter, ToolRequest, ToolResponse};
    use gantry_core::run::RunStatus;
    use gantry_core::trigger::EventKind;

    struct Succeed;

    #[async_trait::async_trait]
    impl ToolAdapter for Succeed {
        async fn invoke(&self, _request: ToolRequest) -> Result<ToolResponse> {
            Ok(ToolResponse::success())
        }
    }

    const PIPELINE: &str = r#"
version: "1"
name: web
triggers:
  - type: push
    branches: [main]
jobs:
  - name: test
    tool: npm
    args: [test]
  - name: deploy
    tool: gantry/deploy
    needs: [test]
deploy:
  image_repository: ghcr.io/org/repo
"#;

    fn executor() -> RunExecutor {
        RunExecutor::new(Arc::new(Succeed), Arc::new(MemoryArtifactStore::new()))
    }

    #[test]
    fn test_deploy_job_requires_deploy_section() {
        let mut definition: PipelineDefinition = serde_yaml::from_str(PIPELINE).unwrap();
        assert!(validate(&definition).unwrap().is_some());

        definition.deploy = None;
        assert!(matches!(validate(&definition), Err(Error::LoopGuard(_))));
    }

    #[tokio::test]
    async fn test_descriptor_only_push_is_gated_out() {
        let definition: PipelineDefinition = serde_yaml::from_str(PIPELINE).unwrap();
        let scheduler = Scheduler::new(&definition, executor()).unwrap();

        let ctx = TriggerContext::new(EventKind::Push, "refs/heads/main", "abc")
            .with_changed_paths(["kubernetes/deployment.yaml"]);
        let report = scheduler.handle_trigger(ctx, CancelSignal::never()).await.unwrap();

        assert_eq!(report.status, RunStatus::Skipped);
        assert!(report.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_matching_push_runs_all_jobs() {
        let definition: PipelineDefinition = serde_yaml::from_str(PIPELINE).unwrap();
        let scheduler = Scheduler::new(&definition, executor()).unwrap();

        let ctx = TriggerContext::new(EventKind::Push, "refs/heads/main", "abc")
            .with_changed_paths(["src/app.js"]);
        let report = scheduler.handle_trigger(ctx, CancelSignal::never()).await.unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.jobs.len(), 2);
    }

    #[test]
    fn test_other_branch_is_not_planned() {
        let definition: PipelineDefinition = serde_yaml::from_str(PIPELINE).unwrap();
        let scheduler = Scheduler::new(&definition, executor()).unwrap();
        let ctx = TriggerContext::new(EventKind::Push, "refs/heads/dev", "abc");
        assert!(scheduler.plan(ctx).unwrap().is_none());
    }
}
