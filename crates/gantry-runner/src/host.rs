//! Tool execution as host processes.
//!
//! The tool id is the program, `args` its arguments. Each invocation gets a
//! scratch directory exposed to the process through three variables:
//!
//! - `GANTRY_OUTPUT`: file the tool appends `key=value` outputs to
//! - `GANTRY_ARTIFACTS`: consumed artifacts, one entry per name
//! - `GANTRY_ARTIFACTS_OUT`: every file or directory written here becomes a
//!   produced artifact named after it

use crate::outputs::parse_outputs;
use crate::runner::{OutputLine, OutputStream, RunnerConfig};
use async_trait::async_trait;
use gantry_artifacts::archiver;
use gantry_core::ports::{ConsumedArtifact, ProducedArtifact, ToolAdapter, ToolRequest, ToolResponse};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const OUTPUT_ENV: &str = "GANTRY_OUTPUT";
pub const ARTIFACTS_ENV: &str = "GANTRY_ARTIFACTS";
pub const ARTIFACTS_OUT_ENV: &str = "GANTRY_ARTIFACTS_OUT";

/// Runs tools as child processes of the orchestrator.
pub struct HostProcessAdapter {
    config: RunnerConfig,
    output_tx: Option<mpsc::Sender<OutputLine>>,
}

/// Per-invocation scratch directory, removed on drop unless kept. Dropping
/// covers invocations cut short by a job timeout.
struct Scratch {
    root: PathBuf,
    output_file: PathBuf,
    artifacts_in: PathBuf,
    artifacts_out: PathBuf,
    keep: bool,
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "Removed scratch dir"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove scratch dir"),
        }
    }
}

impl HostProcessAdapter {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            output_tx: None,
        }
    }

    /// Forward process output lines to `tx` instead of the log.
    pub fn with_output(mut self, tx: mpsc::Sender<OutputLine>) -> Self {
        self.output_tx = Some(tx);
        self
    }

    async fn prepare_scratch(&self, request: &ToolRequest) -> Result<Scratch> {
        let root = self
            .config
            .scratch_root
            .join(request.run_id.to_string())
            .join(request.job.as_str());
        let scratch = Scratch {
            output_file: root.join("output"),
            artifacts_in: root.join("artifacts"),
            artifacts_out: root.join("artifacts-out"),
            root,
            keep: self.config.keep_scratch,
        };
        if tokio::fs::try_exists(&scratch.root).await? {
            tokio::fs::remove_dir_all(&scratch.root).await?;
        }
        tokio::fs::create_dir_all(&scratch.artifacts_in).await?;
        tokio::fs::create_dir_all(&scratch.artifacts_out).await?;
        tokio::fs::write(&scratch.output_file, b"").await?;
        Ok(scratch)
    }

    fn environment(&self, request: &ToolRequest, scratch: &Scratch) -> HashMap<String, String> {
        let mut env = HashMap::new();
        let trigger = &request.trigger;
        env.insert("GANTRY_RUN_ID".into(), request.run_id.to_string());
        env.insert("GANTRY_JOB".into(), request.job.to_string());
        env.insert("GANTRY_EVENT".into(), trigger.event.to_string());
        env.insert("GANTRY_REF".into(), trigger.git_ref.clone());
        env.insert("GANTRY_BRANCH".into(), trigger.branch().to_string());
        env.insert("GANTRY_SHA".into(), trigger.sha.clone());
        env.insert("GANTRY_SHORT_SHA".into(), trigger.short_sha().to_string());
        env.insert(OUTPUT_ENV.into(), scratch.output_file.display().to_string());
        env.insert(ARTIFACTS_ENV.into(), scratch.artifacts_in.display().to_string());
        env.insert(ARTIFACTS_OUT_ENV.into(), scratch.artifacts_out.display().to_string());
        env.extend(request.env.clone());
        env
    }

    async fn run_process(&self, request: &ToolRequest, env: HashMap<String, String>) -> Result<i32> {
        info!(
            tool = %request.tool,
            args = ?request.args,
            cwd = %request.working_directory.display(),
            "Executing tool"
        );

        let mut command = Command::new(&request.tool);
        command
            .args(&request.args)
            .current_dir(&request.working_directory)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.config.inherit_env {
            command.env_clear().envs(&env);
        }

        let mut child = command.spawn().map_err(|e| Error::ToolInvocation {
            tool: request.tool.clone(),
            message: format!("failed to spawn process: {}", e),
        })?;

        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(forward_lines(
                out,
                OutputStream::Stdout,
                request.job.to_string(),
                self.output_tx.clone(),
            ))
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(forward_lines(
                err,
                OutputStream::Stderr,
                request.job.to_string(),
                self.output_tx.clone(),
            ))
        });

        let status = child.wait().await.map_err(|e| Error::ToolInvocation {
            tool: request.tool.clone(),
            message: format!("failed to wait for process: {}", e),
        })?;

        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.await;
        }

        Ok(status.code().unwrap_or(-1))
    }
}

impl Default for HostProcessAdapter {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl ToolAdapter for HostProcessAdapter {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
        let start = std::time::Instant::now();
        let scratch = self.prepare_scratch(&request).await?;
        materialize(&request.consumed, &scratch.artifacts_in).await?;

        let env = self.environment(&request, &scratch);
        let exit_code = self.run_process(&request, env).await?;

        let content = tokio::fs::read_to_string(&scratch.output_file)
            .await
            .unwrap_or_default();
        let outputs = parse_outputs(&content);
        let artifacts = if exit_code == 0 {
            collect(&scratch.artifacts_out).await?
        } else {
            Vec::new()
        };

        drop(scratch);

        debug!(
            exit_code,
            outputs = outputs.len(),
            artifacts = artifacts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool completed"
        );

        Ok(ToolResponse {
            exit_code,
            outputs,
            artifacts,
            warnings: Vec::new(),
        })
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: OutputStream,
    job: String,
    tx: Option<mpsc::Sender<OutputLine>>,
) {
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0u32;
    while let Ok(Some(line)) = lines.next_line().await {
        line_number += 1;
        match &tx {
            Some(tx) => {
                let output = OutputLine {
                    job: job.clone(),
                    stream,
                    content: line,
                    line_number,
                    timestamp: chrono::Utc::now(),
                };
                if tx.send(output).await.is_err() {
                    break;
                }
            }
            None => match stream {
                OutputStream::Stdout => info!(job = %job, "{}", line),
                OutputStream::Stderr => warn!(job = %job, "{}", line),
            },
        }
    }
}

/// Write consumed artifacts under `dir`. Tar streams are unpacked into a
/// directory of the artifact's name; any other blob becomes a file.
async fn materialize(consumed: &[ConsumedArtifact], dir: &Path) -> Result<()> {
    for artifact in consumed {
        let name = gantry_artifacts::sanitize_key(&artifact.reference.name);
        let target = dir.join(name);
        if archiver::is_archive(&artifact.data) {
            let data = artifact.data.clone();
            tokio::task::spawn_blocking(move || archiver::unpack(&data, &target))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;
        } else {
            tokio::fs::write(&target, &artifact.data).await?;
        }
        debug!(artifact = %artifact.reference, "Materialized artifact");
    }
    Ok(())
}

/// Gather produced artifacts from `dir`; directories are packed.
async fn collect(dir: &Path) -> Result<Vec<ProducedArtifact>> {
    let mut produced = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let data = if entry.file_type().await?.is_dir() {
            tokio::task::spawn_blocking(move || archiver::pack_dir(&path))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??
        } else {
            tokio::fs::read(&path).await?
        };
        produced.push(ProducedArtifact { name, data });
    }
    produced.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(produced)
}
