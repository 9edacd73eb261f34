//! Git-backed version control client.

use async_trait::async_trait;
use gantry_core::ports::{CommitAuthor, CommitOutcome, VcsClient};
use gantry_core::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

/// Drives the `git` binary inside a working tree.
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new("git");
        command.args(args).current_dir(&self.repo_dir);
        debug!(command = ?command.as_std(), "Running git");
        command
            .output()
            .await
            .map_err(|e| Error::Vcs(format!("Failed to execute git: {}", e)))
    }

    async fn git_ok<I, S>(&self, what: &str, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "git {} failed: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl VcsClient for GitCli {
    async fn commit(
        &self,
        paths: &[PathBuf],
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitOutcome> {
        let mut add: Vec<&OsStr> = vec!["add".as_ref(), "--".as_ref()];
        add.extend(paths.iter().map(|p| p.as_os_str()));
        self.git_ok("add", add).await?;

        let mut diff: Vec<&OsStr> = vec!["diff".as_ref(), "--cached".as_ref(), "--quiet".as_ref(), "--".as_ref()];
        diff.extend(paths.iter().map(|p| p.as_os_str()));
        let staged = self.git(diff).await?;
        if staged.status.success() {
            info!("Nothing to commit, descriptor already up to date");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        let mut commit: Vec<&OsStr> = vec![
            "-c".as_ref(),
            name.as_ref(),
            "-c".as_ref(),
            email.as_ref(),
            "commit".as_ref(),
            "-m".as_ref(),
            message.as_ref(),
            "--".as_ref(),
        ];
        commit.extend(paths.iter().map(|p| p.as_os_str()));
        self.git_ok("commit", commit).await?;

        let head = self.git_ok("rev-parse", ["rev-parse", "HEAD"]).await?;
        let sha = String::from_utf8_lossy(&head.stdout).trim().to_string();
        info!(%sha, "Committed descriptor update");
        Ok(CommitOutcome::Committed { sha })
    }

    async fn push(&self, remote: &str, branch: Option<&str>) -> Result<()> {
        let refspec = branch.map(|b| format!("HEAD:{}", b));
        let mut args = vec!["push", remote];
        if let Some(refspec) = refspec.as_deref() {
            args.push(refspec);
        }
        self.git_ok("push", args).await?;
        info!(remote, branch = branch.unwrap_or("HEAD"), "Pushed descriptor update");
        Ok(())
    }
}
