//! The built-in `gantry/deploy` tool.

use crate::updater::DeploymentUpdater;
use async_trait::async_trait;
use gantry_core::loop_guard::LoopGuard;
use gantry_core::pipeline::DeployConfig;
use gantry_core::ports::{CommitAuthor, CommitOutcome, ToolAdapter, ToolRequest, ToolResponse, VcsClient};
use gantry_core::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable read when no image argument is given.
pub const IMAGE_ENV: &str = "GANTRY_DEPLOY_IMAGE";

/// Updates the deployment descriptor to the image passed as first argument
/// and commits it with the loop guard's marker.
///
/// Outputs: `changed` (`true`/`false`), `image`, and `commit` when a commit
/// was created.
pub struct DeployTool {
    config: DeployConfig,
    guard: LoopGuard,
    updater: DeploymentUpdater,
    vcs: Arc<dyn VcsClient>,
    repo_root: PathBuf,
}

impl DeployTool {
    pub fn new(config: DeployConfig, vcs: Arc<dyn VcsClient>, repo_root: impl Into<PathBuf>) -> Result<Self> {
        let guard = LoopGuard::from_config(&config)?;
        let updater = DeploymentUpdater::new(config.image_repository.clone())?;
        Ok(Self {
            config,
            guard,
            updater,
            vcs,
            repo_root: repo_root.into(),
        })
    }

    pub fn loop_guard(&self) -> &LoopGuard {
        &self.guard
    }

    fn author(&self) -> CommitAuthor {
        CommitAuthor {
            name: self.config.author_name.clone(),
            email: self.config.author_email.clone(),
        }
    }

    /// Apply `image` to the descriptor on disk and commit it.
    pub async fn deploy(&self, image: &str) -> Result<ToolResponse> {
        let path = self.repo_root.join(&self.config.descriptor);
        let current = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::DescriptorMismatch(format!("cannot read {}: {}", path.display(), e))
        })?;

        let outcome = self.updater.apply(&current, image)?;
        let response = ToolResponse::success()
            .with_output("image", image)
            .with_output("changed", outcome.changed.to_string());

        if !outcome.changed {
            info!(image, descriptor = %path.display(), "Descriptor already up to date");
            return Ok(response);
        }

        tokio::fs::write(&path, outcome.descriptor.as_bytes()).await?;
        info!(image, descriptor = %path.display(), "Descriptor updated");

        let message = self.guard.commit_message(image);
        let commit = self
            .vcs
            .commit(&[self.config.descriptor.clone()], &message, &self.author())
            .await?;

        match commit {
            CommitOutcome::Committed { sha } => {
                if self.config.push {
                    let remote = self.config.remote.as_deref().unwrap_or("origin");
                    self.vcs.push(remote, self.config.branch.as_deref()).await?;
                }
                Ok(response.with_output("commit", sha))
            }
            CommitOutcome::NothingToCommit => {
                warn!("Descriptor changed on disk but git saw nothing to commit");
                Ok(response.with_warning("descriptor update produced no commit"))
            }
        }
    }
}

#[async_trait]
impl ToolAdapter for DeployTool {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
        let image = request
            .args
            .first()
            .cloned()
            .or_else(|| request.env.get(IMAGE_ENV).cloned())
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| Error::ToolInvocation {
                tool: request.tool.clone(),
                message: format!("expected the image as first argument or in {}", IMAGE_ENV),
            })?;
        self.deploy(image.trim()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::trigger::{EventKind, TriggerContext};
    use gantry_core::{JobId, RunId};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingVcs {
        commits: Mutex<Vec<(Vec<PathBuf>, String, CommitAuthor)>>,
        pushes: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl VcsClient for RecordingVcs {
        async fn commit(
            &self,
            paths: &[PathBuf],
            message: &str,
            author: &CommitAuthor,
        ) -> Result<CommitOutcome> {
            let mut commits = self.commits.lock().unwrap();
            commits.push((paths.to_vec(), message.to_string(), author.clone()));
            Ok(CommitOutcome::Committed {
                sha: format!("{:040}", commits.len()),
            })
        }

        async fn push(&self, remote: &str, branch: Option<&str>) -> Result<()> {
            self.pushes
                .lock()
                .unwrap()
                .push((remote.to_string(), branch.map(str::to_string)));
            Ok(())
        }
    }

    fn config(push: bool) -> DeployConfig {
        serde_json::from_value(serde_json::json!({
            "image_repository": "ghcr.io/org/repo",
            "push": push,
            "branch": "main",
        }))
        .unwrap()
    }

    fn repo(descriptor: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("kubernetes")).unwrap();
        std::fs::write(dir.path().join("kubernetes/deployment.yaml"), descriptor).unwrap();
        dir
    }

    fn request(root: &Path, image: &str) -> ToolRequest {
        ToolRequest {
            run_id: RunId::new(),
            job: JobId::new("deploy"),
            tool: "gantry/deploy".into(),
            args: vec![image.into()],
            working_directory: root.to_path_buf(),
            env: HashMap::new(),
            consumed: vec![],
            trigger: Arc::new(TriggerContext::new(EventKind::Push, "refs/heads/main", "abc123")),
        }
    }

    #[tokio::test]
    async fn test_deploy_commits_with_marker_and_pushes() {
        let dir = repo("spec:\n  containers:\n    - image: ghcr.io/org/repo:old\n");
        let vcs = Arc::new(RecordingVcs::default());
        let tool = DeployTool::new(config(true), vcs.clone(), dir.path()).unwrap();

        let response = tool
            .invoke(request(dir.path(), "ghcr.io/org/repo:sha-abc123"))
            .await
            .unwrap();

        assert_eq!(response.outputs.get("changed"), Some("true"));
        assert!(response.outputs.contains_key("commit"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("kubernetes/deployment.yaml")).unwrap(),
            "spec:\n  containers:\n    - image: ghcr.io/org/repo:sha-abc123\n"
        );

        let commits = vcs.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, vec![PathBuf::from("kubernetes/deployment.yaml")]);
        assert_eq!(
            commits[0].1,
            "[skip ci] deploy: update image to ghcr.io/org/repo:sha-abc123"
        );
        assert_eq!(commits[0].2.name, "gantry-bot");
        assert_eq!(
            *vcs.pushes.lock().unwrap(),
            vec![("origin".to_string(), Some("main".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_unchanged_descriptor_does_not_commit() {
        let dir = repo("image: ghcr.io/org/repo:sha-abc123\n");
        let vcs = Arc::new(RecordingVcs::default());
        let tool = DeployTool::new(config(false), vcs.clone(), dir.path()).unwrap();

        let response = tool
            .invoke(request(dir.path(), "ghcr.io/org/repo:sha-abc123"))
            .await
            .unwrap();

        assert_eq!(response.outputs.get("changed"), Some("false"));
        assert!(vcs.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_argument() {
        let dir = repo("image: ghcr.io/org/repo:v1\n");
        let tool = DeployTool::new(config(false), Arc::new(RecordingVcs::default()), dir.path()).unwrap();
        let mut req = request(dir.path(), "");
        req.args.clear();
        assert!(matches!(
            tool.invoke(req).await,
            Err(Error::ToolInvocation { .. })
        ));
    }

    #[tokio::test]
    async fn test_descriptor_without_repository_line_fails() {
        let dir = repo("image: docker.io/library/nginx:1.27\n");
        let tool = DeployTool::new(config(false), Arc::new(RecordingVcs::default()), dir.path()).unwrap();
        assert!(matches!(
            tool.invoke(request(dir.path(), "ghcr.io/org/repo:v2")).await,
            Err(Error::DescriptorMismatch(_))
        ));
    }
}
