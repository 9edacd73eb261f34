//! Trigger matching and evaluation.
//!
//! Decides whether a run should exist at all for a trigger context. The
//! pipeline's loop guard is consulted first so that commits made by the
//! deployment updater never start another run.

use gantry_core::loop_guard::{LoopGuard, Suppression};
use gantry_core::pipeline::TriggerConfig;
use gantry_core::trigger::TriggerContext;
use std::fmt;
use tracing::debug;

/// Outcome of matching a trigger context against a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Run,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    LoopGuard(Suppression),
    NoMatchingTrigger,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::LoopGuard(s) => write!(f, "loop guard: {}", s),
            IgnoreReason::NoMatchingTrigger => write!(f, "no trigger matches the event"),
        }
    }
}

/// Matcher for determining if a pipeline should be triggered.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    triggers: Vec<TriggerConfig>,
    loop_guard: Option<LoopGuard>,
}

impl TriggerMatcher {
    pub fn new(triggers: Vec<TriggerConfig>, loop_guard: Option<LoopGuard>) -> Self {
        Self {
            triggers,
            loop_guard,
        }
    }

    pub fn loop_guard(&self) -> Option<&LoopGuard> {
        self.loop_guard.as_ref()
    }

    /// Check if a run should be started for `ctx`.
    ///
    /// With no triggers configured every event matches.
    pub fn decide(&self, ctx: &TriggerContext) -> TriggerDecision {
        if let Some(suppression) = self.loop_guard.as_ref().and_then(|g| g.suppresses(ctx)) {
            debug!(%suppression, sha = %ctx.sha, "Trigger suppressed by loop guard");
            return TriggerDecision::Ignored(IgnoreReason::LoopGuard(suppression));
        }

        if self.triggers.is_empty() || self.triggers.iter().any(|t| self.trigger_matches(t, ctx)) {
            TriggerDecision::Run
        } else {
            TriggerDecision::Ignored(IgnoreReason::NoMatchingTrigger)
        }
    }

    pub fn matches(&self, ctx: &TriggerContext) -> bool {
        self.decide(ctx) == TriggerDecision::Run
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, ctx: &TriggerContext) -> bool {
        trigger.event == ctx.event
            && branch_matches(&trigger.branches, ctx.branch())
            && paths_match(&trigger.paths, &trigger.paths_ignore, ctx)
    }
}

fn branch_matches(patterns: &[String], branch: &str) -> bool {
    if patterns.is_empty() {
        return true; // Match all branches if no patterns specified
    }
    patterns.iter().any(|p| glob_match(p, branch))
}

fn paths_match(include: &[String], exclude: &[String], ctx: &TriggerContext) -> bool {
    if include.is_empty() && exclude.is_empty() {
        return true; // No path filtering
    }
    // Scheduled and manual runs carry no change set.
    if ctx.changed_paths.is_empty() {
        return true;
    }

    let included = include.is_empty()
        || ctx
            .changed_paths
            .iter()
            .any(|path| include.iter().any(|p| glob_match(p, path)));

    let excluded = !exclude.is_empty()
        && ctx
            .changed_paths
            .iter()
            .all(|path| exclude.iter().any(|p| glob_match(p, path)));

    included && !excluded
}

/// Minimal glob: `*`, `**`, `dir/**`, `dir/*`, and one `*` wildcard.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text == prefix || text.starts_with(&format!("{}/", prefix));
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if let Some(rest) = text.strip_prefix(&prefix_slash) {
            return !rest.contains('/');
        }
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix("**/") {
        return text == suffix || text.ends_with(&format!("/{}", suffix)) || glob_match(suffix, text);
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.len() >= parts[0].len() + parts[1].len()
                && text.starts_with(parts[0])
                && text.ends_with(parts[1]);
        }
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::trigger::EventKind;

    fn push_main() -> TriggerConfig {
        TriggerConfig {
            event: EventKind::Push,
            branches: vec!["main".to_string()],
            paths: vec![],
            paths_ignore: vec!["docs/**".to_string()],
        }
    }

    #[test]
    fn test_branch_match_exact() {
        assert!(branch_matches(&["main".to_string()], "main"));
        assert!(!branch_matches(&["main".to_string()], "develop"));
    }

    #[test]
    fn test_branch_match_glob() {
        assert!(branch_matches(&["feature/*".to_string()], "feature/foo"));
        assert!(branch_matches(&["release/**".to_string()], "release/v1/hotfix"));
    }

    #[test]
    fn test_empty_patterns_match_all() {
        assert!(branch_matches(&[], "any-branch"));
    }

    #[test]
    fn test_glob_extensions() {
        assert!(glob_match("*.md", "README.md"));
        assert!(glob_match("**/*.yaml", "kubernetes/deployment.yaml"));
        assert!(!glob_match("src/*", "src/a/b.rs"));
    }

    #[test]
    fn test_push_trigger_with_ignored_paths() {
        let matcher = TriggerMatcher::new(vec![push_main()], None);
        let ctx = TriggerContext::new(EventKind::Push, "main", "a").with_changed_paths(["docs/x.md"]);
        assert_eq!(
            matcher.decide(&ctx),
            TriggerDecision::Ignored(IgnoreReason::NoMatchingTrigger)
        );

        let ctx = TriggerContext::new(EventKind::Push, "main", "a")
            .with_changed_paths(["docs/x.md", "src/app.js"]);
        assert!(matcher.matches(&ctx));
    }

    #[test]
    fn test_loop_guard_wins_over_triggers() {
        let guard = LoopGuard::new("[skip ci]", "kubernetes/deployment.yaml").unwrap();
        let matcher = TriggerMatcher::new(vec![push_main()], Some(guard));
        let ctx = TriggerContext::new(EventKind::Push, "main", "a")
            .with_changed_paths(["kubernetes/deployment.yaml"]);
        assert_eq!(
            matcher.decide(&ctx),
            TriggerDecision::Ignored(IgnoreReason::LoopGuard(Suppression::OnlyDescriptorChanged))
        );
    }

    #[test]
    fn test_no_triggers_matches_everything() {
        let matcher = TriggerMatcher::default();
        let ctx = TriggerContext::new(EventKind::Manual, "anything", "a");
        assert!(matcher.matches(&ctx));
    }
}
