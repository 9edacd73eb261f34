//! Async run execution.
//!
//! Jobs whose dependencies are all terminal are dispatched onto a
//! [`JoinSet`]. Each dependent sees only the outputs of the jobs it declares
//! in `needs`, as shared frozen snapshots.

use crate::job::Job;
use crate::plan::ExecutionPlan;
use chrono::Utc;
use gantry_core::artifact::ArtifactRef;
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::{ArtifactStore, ConsumedArtifact, ToolAdapter, ToolRequest, ToolResponse};
use gantry_core::run::{
    FailureReason, JobOutput, JobResult, JobStatus, RunReport, RunStatus, SkipReason,
};
use gantry_core::trigger::TriggerContext;
use gantry_core::{Error, JobId, Result, RunId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep, timeout};
use tracing::{Instrument, debug, info, info_span, warn};

/// Requests cancellation of a run.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Observes cancellation of a run.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelSignal(rx))
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory job working directories are resolved against.
    pub workspace: PathBuf,
    /// Upper bound on concurrently running jobs; `None` is unbounded.
    pub max_parallel: Option<usize>,
    /// Timeout for jobs that do not set their own.
    pub default_timeout: Duration,
    /// Purge run-scoped artifacts once the run finishes.
    pub purge_artifacts: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_parallel: None,
            default_timeout: Duration::from_secs(60 * 60),
            purge_artifacts: true,
        }
    }
}

pub struct RunExecutor {
    adapter: Arc<dyn ToolAdapter>,
    store: Arc<dyn ArtifactStore>,
    config: ExecutorConfig,
}

impl RunExecutor {
    pub fn new(adapter: Arc<dyn ToolAdapter>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            adapter,
            store,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Execute a plan to completion.
    ///
    /// Job failures are recorded in the report; `Err` is reserved for
    /// failures of the executor itself.
    pub async fn execute(&self, plan: &ExecutionPlan, mut cancel: CancelSignal) -> Result<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = plan.run_id;
        let dag = plan.dag();

        info!(run = %run_id, jobs = dag.len(), scheduled = plan.scheduled().count(), "Starting run");

        let mut state = RunState::default();
        for (id, reason) in &plan.skipped {
            state.settle(JobResult::skipped(id.clone(), reason.clone()));
        }

        let mut pending: Vec<JobId> = dag
            .topological_order()
            .filter(|j| plan.is_scheduled(j.id.as_str()))
            .map(|j| j.id.clone())
            .collect();
        let limit = self.config.max_parallel.unwrap_or(usize::MAX).max(1);
        let mut running: JoinSet<JobResult> = JoinSet::new();
        let mut cancelled = cancel.is_cancelled();

        loop {
            if cancelled {
                for id in pending.drain(..) {
                    info!(job = %id, "Skipping job, run cancelled");
                    state.settle(JobResult::skipped(id, SkipReason::Cancelled));
                }
            } else {
                self.dispatch_ready(plan, &mut pending, &mut state, &mut running, limit)?;
            }

            if running.is_empty() {
                if let Some(stuck) = pending.first() {
                    return Err(Error::Internal(format!(
                        "job '{}' can never become ready",
                        stuck
                    )));
                }
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    if let Some(joined) = joined {
                        let result = joined
                            .map_err(|e| Error::Internal(format!("job task failed: {}", e)))?;
                        state.settle(result);
                    }
                }
                _ = cancel.cancelled(), if !cancelled => {
                    warn!(run = %run_id, running = running.len(), "Run cancelled, waiting for running jobs");
                    cancelled = true;
                }
            }
        }

        let mut warnings = Vec::new();
        let mut jobs = Vec::with_capacity(dag.len());
        let mut required_failed = false;
        for job in dag.topological_order() {
            let Some(result) = state.results.remove(&job.id) else {
                continue;
            };
            if let JobStatus::Failed(reason) = &result.status {
                if job.always {
                    warnings.push(format!("{}: {}", job.id, reason));
                } else {
                    required_failed = true;
                }
            }
            warnings.extend(result.warnings.iter().map(|w| format!("{}: {}", job.id, w)));
            jobs.push(result);
        }

        if self.config.purge_artifacts {
            match self.store.purge_run(run_id).await {
                Ok(purged) => debug!(run = %run_id, purged, "Purged run artifacts"),
                Err(e) => {
                    warn!(run = %run_id, error = %e, "Failed to purge run artifacts");
                    warnings.push(format!("artifact purge failed: {}", e));
                }
            }
        }

        let status = if required_failed {
            RunStatus::Failure
        } else if cancelled {
            RunStatus::Cancelled
        } else if plan.is_empty() {
            RunStatus::Skipped
        } else {
            RunStatus::Success
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(run = %run_id, %status, duration_ms, "Run finished");

        Ok(RunReport {
            run_id,
            status,
            jobs,
            warnings,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        })
    }

    /// Settle jobs whose dependencies failed and spawn jobs that are ready,
    /// until nothing else can move.
    fn dispatch_ready(
        &self,
        plan: &ExecutionPlan,
        pending: &mut Vec<JobId>,
        state: &mut RunState,
        running: &mut JoinSet<JobResult>,
        limit: usize,
    ) -> Result<()> {
        let dag = plan.dag();
        let mut progress = true;
        while progress {
            progress = false;
            let mut i = 0;
            while i < pending.len() {
                let job = dag
                    .job(pending[i].as_str())
                    .ok_or_else(|| Error::JobNotFound(pending[i].to_string()))?;

                if !job.needs.iter().all(|d| state.statuses.contains_key(d)) {
                    i += 1;
                    continue;
                }

                if !job.always
                    && let Some(dep) = job
                        .needs
                        .iter()
                        .find(|d| !state.statuses.get(*d).is_some_and(JobStatus::is_success))
                {
                    warn!(job = %job.id, dependency = %dep, "Skipping job, dependency not met");
                    let reason = SkipReason::DependencyNotMet {
                        dependency: dep.clone(),
                    };
                    pending.remove(i);
                    state.settle(JobResult::skipped(job.id.clone(), reason));
                    progress = true;
                    continue;
                }

                // An `always` job never starts without the artifacts it consumes.
                if let Some(dep) = job
                    .consumes
                    .iter()
                    .find(|d| !state.artifacts.contains_key(&(d.job.clone(), d.name.clone())))
                {
                    warn!(job = %job.id, producer = %dep.job, artifact = %dep.name, "Skipping job, consumed artifact unavailable");
                    let reason = SkipReason::DependencyNotMet {
                        dependency: JobId::new(dep.job.clone()),
                    };
                    pending.remove(i);
                    state.settle(JobResult::skipped(job.id.clone(), reason));
                    progress = true;
                    continue;
                }

                if running.len() >= limit {
                    return Ok(());
                }

                let task = self.prepare(plan, job, state);
                let span = info_span!("job", run = %plan.run_id, job = %job.id, tool = %job.body.tool);
                info!(parent: &span, "Dispatching job");
                running.spawn(task.run().instrument(span));
                pending.remove(i);
                progress = true;
            }
        }
        Ok(())
    }

    fn prepare(&self, plan: &ExecutionPlan, job: &Job, state: &RunState) -> JobTask {
        let mut interp = InterpolationContext::with_trigger(plan.trigger.clone());
        interp.variables = plan.variables.clone();
        for dep in &job.needs {
            if let Some(output) = state.outputs.get(dep) {
                interp.needs.insert(dep.to_string(), Arc::clone(output));
            }
        }

        let consumed = job
            .consumes
            .iter()
            .filter_map(|dep| state.artifacts.get(&(dep.job.clone(), dep.name.clone())))
            .cloned()
            .collect();

        let working_directory = match &job.body.working_directory {
            Some(dir) => self.config.workspace.join(interp.interpolate(dir)),
            None => self.config.workspace.clone(),
        };

        JobTask {
            run_id: plan.run_id,
            job: job.clone(),
            args: job.body.args.iter().map(|a| interp.interpolate(a)).collect(),
            env: job
                .body
                .env
                .iter()
                .map(|(k, v)| (k.clone(), interp.interpolate(v)))
                .collect(),
            working_directory,
            consumed,
            trigger: plan.trigger.clone(),
            timeout: job.timeout.unwrap_or(self.config.default_timeout),
            warnings: Vec::new(),
            adapter: Arc::clone(&self.adapter),
            store: Arc::clone(&self.store),
        }
    }
}

#[derive(Default)]
struct RunState {
    statuses: HashMap<JobId, JobStatus>,
    results: HashMap<JobId, JobResult>,
    outputs: HashMap<JobId, Arc<JobOutput>>,
    artifacts: HashMap<(String, String), ArtifactRef>,
}

impl RunState {
    fn settle(&mut self, result: JobResult) {
        match &result.status {
            JobStatus::Success => {
                info!(job = %result.job, attempts = result.attempts, "Job succeeded");
                self.outputs
                    .insert(result.job.clone(), Arc::new(result.outputs.clone()));
                for reference in &result.artifacts {
                    self.artifacts.insert(
                        (reference.producer.to_string(), reference.name.clone()),
                        reference.clone(),
                    );
                }
            }
            JobStatus::Failed(reason) => {
                warn!(job = %result.job, %reason, attempts = result.attempts, "Job failed");
            }
            JobStatus::Skipped(reason) => debug!(job = %result.job, %reason, "Job skipped"),
        }
        self.statuses.insert(result.job.clone(), result.status.clone());
        self.results.insert(result.job.clone(), result);
    }
}

/// Longest wait between two attempts of a job.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Delay before the attempt following `attempt`, doubling each time when
/// `exponential` and never above [`MAX_RETRY_DELAY`].
fn retry_delay(delay_seconds: u64, attempt: u32, exponential: bool) -> Duration {
    let seconds = if exponential {
        2u64.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| factor.checked_mul(delay_seconds))
            .unwrap_or(u64::MAX)
    } else {
        delay_seconds
    };
    Duration::from_secs(seconds).min(MAX_RETRY_DELAY)
}

/// Everything a spawned job needs, detached from the executor's borrows.
struct JobTask {
    run_id: RunId,
    job: Job,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_directory: PathBuf,
    consumed: Vec<ArtifactRef>,
    trigger: Arc<TriggerContext>,
    timeout: Duration,
    warnings: Vec<String>,
    adapter: Arc<dyn ToolAdapter>,
    store: Arc<dyn ArtifactStore>,
}

impl JobTask {
    async fn run(mut self) -> JobResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let (status, outputs, artifacts, attempts) = self.execute().await;

        JobResult {
            job: self.job.id.clone(),
            status,
            outputs,
            artifacts,
            warnings: std::mem::take(&mut self.warnings),
            attempts,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            duration_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    async fn execute(&mut self) -> (JobStatus, JobOutput, Vec<ArtifactRef>, u32) {
        let consumed = match self.fetch_consumed().await {
            Ok(consumed) => consumed,
            Err(e) => {
                let reason = FailureReason::Artifact {
                    message: e.to_string(),
                };
                return (JobStatus::Failed(reason), JobOutput::default(), Vec::new(), 0);
            }
        };

        let request = ToolRequest {
            run_id: self.run_id,
            job: self.job.id.clone(),
            tool: self.job.body.tool.clone(),
            args: std::mem::take(&mut self.args),
            working_directory: self.working_directory.clone(),
            env: std::mem::take(&mut self.env),
            consumed,
            trigger: self.trigger.clone(),
        };

        let (response, attempts) = match self.invoke_with_retry(request).await {
            Ok(done) => done,
            Err((reason, attempts)) => {
                return (JobStatus::Failed(reason), JobOutput::default(), Vec::new(), attempts);
            }
        };

        self.warnings.extend(response.warnings.iter().cloned());
        let outputs = self.declared_outputs(&response);

        match self.store_artifacts(response).await {
            Ok(artifacts) => (JobStatus::Success, outputs, artifacts, attempts),
            Err(reason) => (JobStatus::Failed(reason), JobOutput::default(), Vec::new(), attempts),
        }
    }

    async fn fetch_consumed(&self) -> Result<Vec<ConsumedArtifact>> {
        let mut consumed = Vec::with_capacity(self.consumed.len());
        for reference in &self.consumed {
            debug!(artifact = %reference, "Fetching artifact");
            let data = self.store.get(reference).await?;
            consumed.push(ConsumedArtifact {
                reference: reference.clone(),
                data,
            });
        }
        Ok(consumed)
    }

    async fn invoke_with_retry(
        &mut self,
        request: ToolRequest,
    ) -> std::result::Result<(ToolResponse, u32), (FailureReason, u32)> {
        let retry = self.job.retry.clone().unwrap_or_default();
        let max_attempts = retry.max_attempts.max(1);
        let delay_seconds = u64::from(retry.delay_seconds);

        let mut attempt = 1;
        loop {
            let reason = match timeout(self.timeout, self.adapter.invoke(request.clone())).await {
                Ok(Ok(response)) if response.is_success() => return Ok((response, attempt)),
                Ok(Ok(response)) => {
                    self.warnings.extend(response.warnings);
                    FailureReason::ExitCode {
                        code: response.exit_code,
                    }
                }
                Ok(Err(e)) => FailureReason::Adapter {
                    message: e.to_string(),
                },
                Err(_) => FailureReason::Timeout {
                    seconds: self.timeout.as_secs(),
                },
            };

            if attempt >= max_attempts {
                return Err((reason, attempt));
            }

            let delay = retry_delay(delay_seconds, attempt, retry.exponential_backoff);
            warn!(%reason, attempt, max_attempts, "Attempt failed, retrying in {:?}", delay);
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Keep only the output keys the job declares.
    fn declared_outputs(&self, response: &ToolResponse) -> JobOutput {
        response
            .outputs
            .iter()
            .filter(|(key, _)| {
                let declared = self.job.outputs.iter().any(|o| o == key);
                if !declared {
                    debug!(key, "Dropping undeclared output");
                }
                declared
            })
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn store_artifacts(
        &self,
        mut response: ToolResponse,
    ) -> std::result::Result<Vec<ArtifactRef>, FailureReason> {
        let mut stored = Vec::with_capacity(self.job.produces.len());
        for name in &self.job.produces {
            let Some(pos) = response.artifacts.iter().position(|a| &a.name == name) else {
                return Err(FailureReason::Artifact {
                    message: format!("declared artifact '{}' was not produced", name),
                });
            };
            let artifact = response.artifacts.swap_remove(pos);
            let reference = self
                .store
                .put(self.run_id, &self.job.id, name, artifact.data)
                .await
                .map_err(|e| FailureReason::Artifact {
                    message: e.to_string(),
                })?;
            info!(artifact = %reference, "Stored artifact");
            stored.push(reference);
        }
        for extra in &response.artifacts {
            warn!(artifact = %extra.name, "Ignoring undeclared artifact");
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use crate::plan::plan;
    use async_trait::async_trait;
    use gantry_artifacts::MemoryArtifactStore;
    use gantry_core::pipeline::RetryConfig;
    use gantry_core::trigger::EventKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Adapter driven by the job name: `fail*` exits 1, `slow*` sleeps,
    /// everything else echoes its args as outputs.
    #[derive(Default)]
    struct ScriptedAdapter {
        seen: Mutex<Vec<ToolRequest>>,
        flaky_calls: AtomicU32,
    }

    #[async_trait]
    impl ToolAdapter for ScriptedAdapter {
        async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
            self.seen.lock().unwrap().push(request.clone());
            let name = request.job.as_str();
            if name.starts_with("fail") {
                return Ok(ToolResponse::failure(1));
            }
            if name.starts_with("slow") {
                sleep(Duration::from_secs(600)).await;
            }
            if name.starts_with("flaky") && self.flaky_calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Ok(ToolResponse::failure(2));
            }
            if name.starts_with("broken") {
                return Err(Error::ToolInvocation {
                    tool: request.tool,
                    message: "connection refused".into(),
                });
            }
            let mut response = ToolResponse::success();
            for (i, arg) in request.args.iter().enumerate() {
                response = response.with_output(format!("arg{}", i), arg.clone());
            }
            if name == "build" {
                response = response.with_artifact("dist", b"bundle".to_vec());
            }
            Ok(response)
        }
    }

    impl ScriptedAdapter {
        fn request(&self, job: &str) -> Option<ToolRequest> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.job.as_str() == job)
                .cloned()
        }
    }

    fn push_main() -> Arc<TriggerContext> {
        Arc::new(TriggerContext::new(EventKind::Push, "refs/heads/main", "abc123"))
    }

    async fn run_jobs(adapter: Arc<ScriptedAdapter>, jobs: Vec<Job>) -> RunReport {
        let dag = Arc::new(DagBuilder::new().build(jobs).unwrap());
        let plan = plan(dag, push_main(), HashMap::new()).unwrap();
        RunExecutor::new(adapter, Arc::new(MemoryArtifactStore::new()))
            .execute(&plan, CancelSignal::never())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_not_siblings() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter.clone(),
            vec![
                Job::new("fail-a", "x"),
                Job::new("b", "x").needs(["fail-a"]),
                Job::new("c", "x").needs(["b"]),
                Job::new("sibling", "x"),
                Job::new("after-sibling", "x").needs(["sibling"]),
            ],
        )
        .await;

        assert_eq!(report.status, RunStatus::Failure);
        assert!(report.job("fail-a").unwrap().status.is_failed());
        assert_eq!(
            report.job("b").unwrap().status,
            JobStatus::Skipped(SkipReason::DependencyNotMet {
                dependency: JobId::new("fail-a")
            })
        );
        assert!(report.job("c").unwrap().status.is_skipped());
        assert!(report.job("sibling").unwrap().status.is_success());
        assert!(report.job("after-sibling").unwrap().status.is_success());
        assert!(adapter.request("b").is_none());
    }

    #[tokio::test]
    async fn test_outputs_visible_only_to_declared_dependents() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter.clone(),
            vec![
                Job::new("docker", "x")
                    .args(["ghcr.io/org/repo:sha-abc123", "secret"])
                    .outputs(["arg0"]),
                Job::new("deploy", "x")
                    .needs(["docker"])
                    .args(["${{ needs.docker.outputs.arg0 }}"]),
            ],
        )
        .await;

        assert_eq!(report.status, RunStatus::Success);
        let deploy = adapter.request("deploy").unwrap();
        assert_eq!(deploy.args, vec!["ghcr.io/org/repo:sha-abc123".to_string()]);
        let docker = report.job("docker").unwrap();
        assert_eq!(docker.outputs.get("arg0"), Some("ghcr.io/org/repo:sha-abc123"));
        assert!(!docker.outputs.contains_key("arg1"));
    }

    #[tokio::test]
    async fn test_artifacts_flow_from_producer_to_consumer() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter.clone(),
            vec![
                Job::new("build", "x").produces(["dist"]),
                Job::new("docker", "x").needs(["build"]).consumes("build", "dist"),
            ],
        )
        .await;

        assert_eq!(report.status, RunStatus::Success);
        let docker = adapter.request("docker").unwrap();
        assert_eq!(docker.consumed.len(), 1);
        assert_eq!(docker.consumed[0].data, b"bundle".to_vec());
        assert_eq!(report.job("build").unwrap().artifacts[0].name, "dist");
    }

    #[tokio::test]
    async fn test_always_consumer_skipped_when_producer_fails() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter.clone(),
            vec![
                Job::new("fail-build", "x").produces(["dist"]),
                Job::new("report", "x")
                    .needs(["fail-build"])
                    .consumes("fail-build", "dist")
                    .always(),
            ],
        )
        .await;

        assert!(adapter.request("report").is_none());
        assert_eq!(
            report.job("report").unwrap().status,
            JobStatus::Skipped(SkipReason::DependencyNotMet {
                dependency: JobId::new("fail-build")
            })
        );
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_always_consumer_runs_when_artifact_exists() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter.clone(),
            vec![
                Job::new("build", "x").produces(["dist"]),
                Job::new("fail-lint", "x"),
                Job::new("report", "x")
                    .needs(["build", "fail-lint"])
                    .consumes("build", "dist")
                    .always(),
            ],
        )
        .await;

        let report_request = adapter.request("report").unwrap();
        assert_eq!(report_request.consumed.len(), 1);
        assert!(report.job("report").unwrap().status.is_success());
    }

    #[test]
    fn test_retry_delay_is_bounded() {
        assert_eq!(retry_delay(5, 1, true), Duration::from_secs(5));
        assert_eq!(retry_delay(5, 3, true), Duration::from_secs(20));
        assert_eq!(retry_delay(5, 3, false), Duration::from_secs(5));
        assert_eq!(retry_delay(5, 200, true), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(u64::MAX, 2, true), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_missing_declared_artifact_fails_producer() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(adapter, vec![Job::new("compile", "x").produces(["dist"])]).await;
        assert!(matches!(
            report.job("compile").unwrap().status,
            JobStatus::Failed(FailureReason::Artifact { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_job() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter,
            vec![
                Job::new("slow", "x").timeout(Duration::from_secs(5)),
                Job::new("after", "x").needs(["slow"]),
            ],
        )
        .await;

        assert_eq!(
            report.job("slow").unwrap().status,
            JobStatus::Failed(FailureReason::Timeout { seconds: 5 })
        );
        assert!(report.job("after").unwrap().status.is_skipped());
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter,
            vec![Job::new("flaky", "x").retry(RetryConfig {
                max_attempts: 3,
                delay_seconds: 1,
                exponential_backoff: true,
            })],
        )
        .await;

        let flaky = report.job("flaky").unwrap();
        assert!(flaky.status.is_success());
        assert_eq!(flaky.attempts, 3);
    }

    #[tokio::test]
    async fn test_adapter_error_is_job_failure() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(adapter, vec![Job::new("broken", "x")]).await;
        assert!(matches!(
            report.job("broken").unwrap().status,
            JobStatus::Failed(FailureReason::Adapter { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_always_job_is_a_warning() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter,
            vec![
                Job::new("deploy", "x"),
                Job::new("fail-cleanup", "x").needs(["deploy"]).always(),
            ],
        )
        .await;

        assert_eq!(report.status, RunStatus::Success);
        assert!(report.warnings.iter().any(|w| w.starts_with("fail-cleanup")));
    }

    #[tokio::test]
    async fn test_always_job_runs_after_failure() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let report = run_jobs(
            adapter,
            vec![
                Job::new("fail-deploy", "x"),
                Job::new("cleanup", "x").needs(["fail-deploy"]).always(),
            ],
        )
        .await;

        assert!(report.job("cleanup").unwrap().status.is_success());
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_skips_unstarted_jobs() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let dag = Arc::new(
            DagBuilder::new()
                .build(vec![
                    Job::new("slow", "x").timeout(Duration::from_secs(30)),
                    Job::new("next", "x").needs(["slow"]),
                ])
                .unwrap(),
        );
        let plan = plan(dag, push_main(), HashMap::new()).unwrap();
        let (handle, signal) = cancellation();
        let executor = RunExecutor::new(adapter.clone(), Arc::new(MemoryArtifactStore::new()));

        let (report, ()) = tokio::join!(executor.execute(&plan, signal), async {
            sleep(Duration::from_secs(1)).await;
            handle.cancel();
        });
        let report = report.unwrap();

        assert_eq!(
            report.job("next").unwrap().status,
            JobStatus::Skipped(SkipReason::Cancelled)
        );
        // The running job was left to finish on its own.
        assert!(report.job("slow").unwrap().status.is_failed());
        assert!(adapter.request("next").is_none());
    }

    #[tokio::test]
    async fn test_max_parallel_still_runs_everything() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let dag = Arc::new(
            DagBuilder::new()
                .build((0..6).map(|i| Job::new(format!("job{}", i), "x")).collect())
                .unwrap(),
        );
        let plan = plan(dag, push_main(), HashMap::new()).unwrap();
        let config = ExecutorConfig {
            max_parallel: Some(2),
            ..ExecutorConfig::default()
        };
        let report = RunExecutor::new(adapter, Arc::new(MemoryArtifactStore::new()))
            .with_config(config)
            .execute(&plan, CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.count(JobStatus::is_success), 6);
    }
}
