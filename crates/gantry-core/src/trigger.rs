//! The immutable record describing why a pipeline run exists.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Schedule,
    Manual,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Schedule => "schedule",
            EventKind::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Trigger context for a single run.
///
/// Created once when the hosting platform reports an event and shared
/// read-only (behind an `Arc`) with gating, planning and interpolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerContext {
    pub event: EventKind,
    /// Target branch. Accepts either `main` or `refs/heads/main`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub changed_paths: BTreeSet<String>,
    /// Commit identifier the run builds.
    pub sha: String,
    /// Message of the head commit, used to detect loop-breaking markers.
    #[serde(default)]
    pub head_commit_message: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

impl TriggerContext {
    pub fn new(event: EventKind, git_ref: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            event,
            git_ref: git_ref.into(),
            changed_paths: BTreeSet::new(),
            sha: sha.into(),
            head_commit_message: None,
            actor: None,
        }
    }

    pub fn with_changed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.head_commit_message = Some(message.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// Abbreviated commit identifier (first seven characters).
    pub fn short_sha(&self) -> &str {
        let end = self
            .sha
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.sha.len());
        &self.sha[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_strips_ref_prefix() {
        let ctx = TriggerContext::new(EventKind::Push, "refs/heads/main", "abc");
        assert_eq!(ctx.branch(), "main");
        let ctx = TriggerContext::new(EventKind::Push, "release/v1", "abc");
        assert_eq!(ctx.branch(), "release/v1");
    }

    #[test]
    fn test_short_sha() {
        let ctx = TriggerContext::new(EventKind::Push, "main", "abc123def4567");
        assert_eq!(ctx.short_sha(), "abc123d");
        let ctx = TriggerContext::new(EventKind::Push, "main", "abc");
        assert_eq!(ctx.short_sha(), "abc");
    }

    #[test]
    fn test_deserialize_event_file() {
        let json = r#"{
            "event": "pull_request",
            "ref": "main",
            "sha": "abc123",
            "changed_paths": ["src/app.js", "README.md"]
        }"#;
        let ctx: TriggerContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.event, EventKind::PullRequest);
        assert_eq!(ctx.changed_paths.len(), 2);
        assert!(ctx.head_commit_message.is_none());
    }
}
