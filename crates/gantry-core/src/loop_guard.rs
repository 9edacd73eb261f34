//! Loop breaking for pipelines that commit back to the repository they watch.
//!
//! The deploy side writes the descriptor and embeds the marker in its commit
//! message; the trigger side refuses runs whose head commit carries the
//! marker or whose changes are confined to the descriptor. Both sides are
//! built from the same `LoopGuard` so they cannot drift apart.

use crate::pipeline::DeployConfig;
use crate::trigger::TriggerContext;
use crate::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopGuard {
    marker: String,
    descriptor: String,
}

/// Why a trigger was suppressed by the loop guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    MarkerInCommitMessage,
    OnlyDescriptorChanged,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suppression::MarkerInCommitMessage => write!(f, "commit message carries the loop marker"),
            Suppression::OnlyDescriptorChanged => write!(f, "only the deployment descriptor changed"),
        }
    }
}

impl LoopGuard {
    pub fn new(marker: impl Into<String>, descriptor: impl Into<String>) -> Result<Self> {
        let marker = marker.into();
        let descriptor = normalize(&descriptor.into());
        if marker.trim().is_empty() {
            return Err(Error::LoopGuard("commit marker must not be empty".into()));
        }
        if descriptor.is_empty() {
            return Err(Error::LoopGuard("descriptor path must not be empty".into()));
        }
        Ok(Self { marker, descriptor })
    }

    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        Self::new(
            config.marker.clone(),
            config.descriptor.to_string_lossy().into_owned(),
        )
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Commit message for a descriptor update to `image`.
    pub fn commit_message(&self, image: &str) -> String {
        format!("{} deploy: update image to {}", self.marker, image)
    }

    pub fn is_descriptor(&self, path: &str) -> bool {
        normalize(path) == self.descriptor
    }

    /// Returns the reason a trigger must be ignored, if any.
    pub fn suppresses(&self, ctx: &TriggerContext) -> Option<Suppression> {
        if ctx
            .head_commit_message
            .as_deref()
            .is_some_and(|m| m.contains(&self.marker))
        {
            return Some(Suppression::MarkerInCommitMessage);
        }
        if !ctx.changed_paths.is_empty() && ctx.changed_paths.iter().all(|p| self.is_descriptor(p)) {
            return Some(Suppression::OnlyDescriptorChanged);
        }
        None
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}
