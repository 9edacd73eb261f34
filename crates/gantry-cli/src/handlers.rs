//! Command handlers.

use crate::commands::TriggerArgs;
use crate::config::CliConfig;
use anyhow::{Context, Result, bail};
use console::style;
use gantry_artifacts::{CompressionType, FilesystemArtifactStore};
use gantry_core::pipeline::{CLEANUP_TOOL, DEPLOY_TOOL, PipelineDefinition};
use gantry_core::run::{JobStatus, RunReport, RunStatus};
use gantry_core::trigger::TriggerContext;
use gantry_deploy::{DeployTool, GitCli};
use gantry_retention::{CleanupTool, GithubClient, RetentionCleaner, RetentionPolicy};
use gantry_runner::{HostProcessAdapter, OutputLine, OutputStream, RunnerConfig, ToolRouter};
use gantry_scheduler::{ExecutorConfig, RunExecutor, Scheduler, cancellation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const TEMPLATE: &str = r#"version: "1"
name: my-service

triggers:
  - type: push
    branches: [main]

deploy:
  descriptor: kubernetes/deployment.yaml
  image_repository: ghcr.io/org/repo

retention:
  keep_last: 2

jobs:
  - name: test
    tool: npm
    args: [test]

  - name: build
    needs: [test]
    tool: npm
    args: [run, build]
    produces: [dist]

  - name: docker
    needs: [build]
    tool: ./scripts/publish-image.sh
    consumes:
      - { job: build, name: dist }
    outputs: [image]

  - name: deploy
    needs: [docker]
    tool: gantry/deploy
    args: ["${{ needs.docker.outputs.image }}"]

  - name: cleanup
    needs: [deploy]
    always: true
    tool: gantry/cleanup
"#;

/// Read and parse a pipeline file.
pub fn load_pipeline(path: &Path) -> Result<PipelineDefinition> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Build the trigger context from an event file or from flags.
pub fn trigger_context(args: &TriggerArgs, config: &CliConfig) -> Result<TriggerContext> {
    if let Some(path) = &args.event {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("parsing trigger event {}", path.display()));
    }

    let git_ref = args
        .git_ref
        .clone()
        .unwrap_or_else(|| config.default_branch.clone());
    let mut ctx = TriggerContext::new(args.kind.into(), git_ref, args.sha.clone())
        .with_changed_paths(args.changed.iter().cloned());
    if let Some(message) = &args.message {
        ctx = ctx.with_commit_message(message.clone());
    }
    if let Some(actor) = &args.actor {
        ctx = ctx.with_actor(actor.clone());
    }
    Ok(ctx)
}

/// Initialize a new pipeline.
pub fn init(force: bool) -> Result<()> {
    let path = Path::new("gantry.yaml");

    if path.exists() && !force {
        println!("{} gantry.yaml already exists", style("!").yellow());
        return Ok(());
    }

    std::fs::write(path, TEMPLATE)?;
    println!("{} Created gantry.yaml", style("✓").green());
    Ok(())
}

/// Validate a pipeline configuration.
pub fn validate(path: &Path) -> Result<()> {
    let definition = load_pipeline(path)?;
    let loop_guard = gantry_scheduler::validate(&definition)?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!("  Jobs: {}", definition.jobs.len());
    for job in &definition.jobs {
        if job.needs.is_empty() {
            println!("    - {} ({})", job.name, style(&job.tool).dim());
        } else {
            println!(
                "    - {} ({}) needs {}",
                job.name,
                style(&job.tool).dim(),
                job.needs.join(", ")
            );
        }
    }
    if let Some(guard) = loop_guard {
        println!(
            "  Loop guard: marker {} on {}",
            style(guard.marker()).cyan(),
            guard.descriptor()
        );
    }
    Ok(())
}

/// Show which jobs would run for a trigger.
pub fn plan(pipeline: &Path, trigger: &TriggerArgs, config: &CliConfig) -> Result<()> {
    let definition = load_pipeline(pipeline)?;
    let ctx = trigger_context(trigger, config)?;
    let executor = build_executor(&definition, config, &workspace_for(pipeline, None), None)?;
    let scheduler = Scheduler::new(&definition, executor)?;

    let Some(plan) = scheduler.plan(ctx)? else {
        println!(
            "{} Trigger ignored, no jobs would run",
            style("○").dim()
        );
        return Ok(());
    };

    println!(
        "{} Plan for {} ({} jobs)",
        style("▶").cyan(),
        style(&definition.name).bold(),
        plan.scheduled().count()
    );
    for (index, batch) in plan.batches.iter().enumerate() {
        let names: Vec<&str> = batch.iter().map(|j| j.as_str()).collect();
        println!("  {}. {}", index + 1, names.join(", "));
    }
    for (job, reason) in &plan.skipped {
        println!("  {} {} skipped: {}", style("-").dim(), job, reason);
    }
    Ok(())
}

/// Run the pipeline. Returns the final run status.
pub async fn run(
    pipeline: &Path,
    trigger: &TriggerArgs,
    workspace: Option<PathBuf>,
    artifacts_dir: Option<PathBuf>,
    max_parallel: Option<usize>,
    json: bool,
    config: &CliConfig,
) -> Result<RunStatus> {
    let mut definition = load_pipeline(pipeline)?;
    if max_parallel.is_some() {
        definition.max_parallel = max_parallel;
    }
    let ctx = trigger_context(trigger, config)?;
    let workspace = workspace_for(pipeline, workspace);

    let (tx, mut rx) = mpsc::channel::<OutputLine>(1024);
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let prefix = style(format!("[{}]", line.job)).dim();
            match line.stream {
                OutputStream::Stdout => println!("{} {}", prefix, line.content),
                OutputStream::Stderr => eprintln!("{} {}", prefix, style(&line.content).red()),
            }
        }
    });

    let mut config = config.clone();
    if artifacts_dir.is_some() {
        config.artifacts_dir = artifacts_dir;
    }
    let executor = build_executor(&definition, &config, &workspace, Some(tx))?;
    let scheduler = Scheduler::new(&definition, executor)?;

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling jobs that have not started");
            handle.cancel();
        }
    });

    info!(pipeline = %definition.name, sha = %ctx.sha, "Handling trigger");
    let report = scheduler.handle_trigger(ctx, signal).await?;
    drop(scheduler);
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.status)
}

/// Update the descriptor outside of a pipeline run.
pub async fn deploy(image: &str, pipeline: &Path, repo: &Path, push: bool) -> Result<()> {
    let definition = load_pipeline(pipeline)?;
    let Some(mut deploy) = definition.deploy else {
        bail!("{} has no deploy section", pipeline.display());
    };
    deploy.push |= push;

    let tool = DeployTool::new(deploy, Arc::new(GitCli::new(repo)), repo)?;
    let response = tool.deploy(image).await?;

    if response.outputs.get("changed") == Some("true") {
        println!(
            "{} Descriptor now points at {}",
            style("✓").green(),
            style(image).bold()
        );
        if let Some(commit) = response.outputs.get("commit") {
            println!("  Commit: {}", commit);
        }
    } else {
        println!("{} Descriptor already points at {}", style("○").dim(), image);
    }
    for warning in &response.warnings {
        println!("{} {}", style("!").yellow(), warning);
    }
    Ok(())
}

/// Apply the retention policy. Deletion failures are reported, not fatal.
pub async fn cleanup(
    pipeline: &Path,
    keep_last: Option<usize>,
    exclude_run: Option<String>,
    dry_run: bool,
    config: &CliConfig,
) -> Result<()> {
    let definition = load_pipeline(pipeline)?;
    let mut retention = definition.retention.unwrap_or_default();
    if let Some(keep_last) = keep_last {
        retention.keep_last = keep_last;
    }
    retention.dry_run |= dry_run;
    if retention.registry.is_none() && retention.runs.is_none() {
        println!("{} No retention targets configured", style("!").yellow());
        return Ok(());
    }

    let tool = CleanupTool::from_config(&retention, github_client(config)?);
    let (report, errors) = tool.clean(exclude_run.as_deref()).await;

    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    println!(
        "{} {} {} record(s), kept {}",
        style("✓").green(),
        verb,
        report.deleted.len(),
        report.kept.len()
    );
    for id in &report.deleted {
        println!("  - {}", id);
    }
    for warning in report.warnings().iter().chain(&errors) {
        println!("{} {}", style("!").yellow(), warning);
    }
    Ok(())
}

/// Print the pipeline JSON schema.
pub fn schema() -> Result<()> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("Current configuration:");
    println!("  default_branch: {}", config.default_branch);
    println!("  artifacts_dir: {}", display_or_unset(config.artifacts_dir.as_deref()));
    println!("  scratch_dir: {}", display_or_unset(config.scratch_dir.as_deref()));
    println!("  compress_artifacts: {}", config.compress_artifacts);
    println!(
        "  github_api_url: {}",
        config.github_api_url.as_deref().unwrap_or("(default)")
    );
    println!("  log_format: {:?}", config.log_format);
    println!(
        "  github token: {}",
        if GithubClient::from_env().is_ok_and(|c| c.has_token()) {
            "***"
        } else {
            "(not set)"
        }
    );

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

pub fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

fn display_or_unset(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

fn workspace_for(pipeline: &Path, workspace: Option<PathBuf>) -> PathBuf {
    workspace.unwrap_or_else(|| match pipeline.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    })
}

fn github_client(config: &CliConfig) -> Result<GithubClient> {
    let client = GithubClient::from_env()?;
    match &config.github_api_url {
        Some(url) => Ok(client.with_base_url(url)?),
        None => Ok(client),
    }
}

/// Wire the built-in tools and the host process fallback behind one router.
fn build_executor(
    definition: &PipelineDefinition,
    config: &CliConfig,
    workspace: &Path,
    output: Option<mpsc::Sender<OutputLine>>,
) -> Result<RunExecutor> {
    let mut runner = RunnerConfig::default();
    if let Some(scratch) = &config.scratch_dir {
        runner.scratch_root = scratch.clone();
    }
    let mut host = HostProcessAdapter::new(runner);
    if let Some(tx) = output {
        host = host.with_output(tx);
    }

    let mut router = ToolRouter::new().fallback(Arc::new(host));
    if let Some(deploy) = &definition.deploy {
        let vcs = Arc::new(GitCli::new(workspace));
        router = router.route(
            DEPLOY_TOOL,
            Arc::new(DeployTool::new(deploy.clone(), vcs, workspace)?),
        );
    }
    let cleanup = match &definition.retention {
        Some(retention) => CleanupTool::from_config(retention, github_client(config)?),
        None => CleanupTool::new(RetentionCleaner::new(RetentionPolicy::default())),
    };
    router = router.route(CLEANUP_TOOL, Arc::new(cleanup));

    let compression = if config.compress_artifacts {
        CompressionType::Zstd
    } else {
        CompressionType::None
    };
    let store = FilesystemArtifactStore::new(config.artifacts_root(workspace)).with_compression(compression);

    Ok(RunExecutor::new(Arc::new(router), Arc::new(store)).with_config(ExecutorConfig {
        workspace: workspace.to_path_buf(),
        ..ExecutorConfig::default()
    }))
}

fn print_report(report: &RunReport) {
    if report.jobs.is_empty() {
        println!("{} Run gated out, no jobs scheduled", style("○").dim());
        return;
    }
    for job in &report.jobs {
        let duration = job
            .duration_ms
            .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
            .unwrap_or_default();
        match &job.status {
            JobStatus::Success => println!("  {} {}{}", style("✓").green(), job.job, duration),
            JobStatus::Failed(reason) => {
                println!("  {} {}{}: {}", style("✗").red(), job.job, duration, reason)
            }
            JobStatus::Skipped(reason) => {
                println!("  {} {} skipped: {}", style("-").dim(), job.job, reason)
            }
        }
    }
    for warning in &report.warnings {
        println!("  {} {}", style("!").yellow(), warning);
    }
    let status = match report.status {
        RunStatus::Success => style(report.status.to_string()).green(),
        RunStatus::Failure => style(report.status.to_string()).red(),
        RunStatus::Cancelled | RunStatus::Skipped => style(report.status.to_string()).yellow(),
    };
    println!(
        "Run {} finished: {} in {:.1}s",
        report.run_id,
        status,
        report.duration_ms as f64 / 1000.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::EventArg;
    use gantry_core::trigger::EventKind;
    use pretty_assertions::assert_eq;

    fn args() -> TriggerArgs {
        TriggerArgs {
            event: None,
            kind: EventArg::Push,
            git_ref: None,
            sha: "abc123".into(),
            changed: vec!["src/app.js".into()],
            message: Some("fix: things".into()),
            actor: None,
        }
    }

    #[test]
    fn test_trigger_from_flags_uses_default_branch() {
        let ctx = trigger_context(&args(), &CliConfig::default()).unwrap();
        assert_eq!(ctx.event, EventKind::Push);
        assert_eq!(ctx.branch(), "main");
        assert!(ctx.changed_paths.contains("src/app.js"));
        assert_eq!(ctx.head_commit_message.as_deref(), Some("fix: things"));
    }

    #[test]
    fn test_trigger_from_event_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(
            &path,
            r#"{"event":"push","ref":"refs/heads/release","sha":"def456","changed_paths":["kubernetes/deployment.yaml"]}"#,
        )
        .unwrap();

        let mut args = args();
        args.event = Some(path);
        let ctx = trigger_context(&args, &CliConfig::default()).unwrap();
        assert_eq!(ctx.branch(), "release");
        assert_eq!(ctx.sha, "def456");
        assert_eq!(ctx.head_commit_message, None);
    }

    #[test]
    fn test_template_is_a_valid_pipeline() {
        let definition: PipelineDefinition = serde_yaml::from_str(TEMPLATE).unwrap();
        let guard = gantry_scheduler::validate(&definition).unwrap();
        assert_eq!(guard.unwrap().descriptor(), "kubernetes/deployment.yaml");
    }

    #[test]
    fn test_workspace_defaults_to_pipeline_dir() {
        assert_eq!(workspace_for(Path::new("gantry.yaml"), None), PathBuf::from("."));
        assert_eq!(
            workspace_for(Path::new("repo/gantry.yaml"), None),
            PathBuf::from("repo")
        );
    }
}
