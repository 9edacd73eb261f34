use crate::run::JobOutput;
use crate::trigger::TriggerContext;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid expression regex"));

/// Context for variable interpolation in job arguments and conditions.
///
/// Only outputs of the job's declared dependencies are ever placed in
/// `needs`, so an expression cannot observe a job it does not depend on.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline variables
    pub variables: HashMap<String, String>,
    /// Frozen outputs of declared dependencies, by job name
    pub needs: HashMap<String, Arc<JobOutput>>,
    pub trigger: Option<Arc<TriggerContext>>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(trigger: Arc<TriggerContext>) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` / `${{ vars.NAME }}` - pipeline variable
    /// - `${{ env.VAR }}` - pipeline variable, then process environment
    /// - `${{ trigger.branch }}`, `trigger.sha`, `trigger.short_sha`, `trigger.event`, `trigger.ref`, `trigger.actor`
    /// - `${{ needs.job.outputs.key }}` - dependency output
    ///
    /// Unknown expressions resolve to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        if let Some(var_name) = expr.strip_prefix("vars.") {
            return self.variables.get(var_name).cloned().unwrap_or_default();
        }

        if let Some(field) = expr.strip_prefix("trigger.") {
            return self.resolve_trigger(field).unwrap_or_default();
        }

        if let Some((job, key)) = parse_needs_reference(expr) {
            return self
                .needs
                .get(job)
                .and_then(|out| out.get(key))
                .map(str::to_string)
                .unwrap_or_default();
        }

        self.variables.get(expr).cloned().unwrap_or_default()
    }

    fn resolve_trigger(&self, field: &str) -> Option<String> {
        let trigger = self.trigger.as_ref()?;
        match field {
            "event" => Some(trigger.event.to_string()),
            "ref" => Some(trigger.git_ref.clone()),
            "branch" => Some(trigger.branch().to_string()),
            "sha" => Some(trigger.sha.clone()),
            "short_sha" => Some(trigger.short_sha().to_string()),
            "actor" => trigger.actor.clone(),
            _ => None,
        }
    }

    /// Evaluate a condition expression (`==`, `!=`, ` contains `, literals).
    pub fn evaluate(&self, expr: &str) -> bool {
        let interpolated = self.interpolate(expr);
        let trimmed = interpolated.trim();

        if trimmed == "true" {
            return true;
        }
        if trimmed == "false" || trimmed.is_empty() {
            return false;
        }

        if let Some((left, right)) = trimmed.split_once("!=") {
            return unquote(left) != unquote(right);
        }
        if let Some((left, right)) = trimmed.split_once("==") {
            return unquote(left) == unquote(right);
        }
        if let Some((left, right)) = trimmed.split_once(" contains ") {
            return unquote(left).contains(unquote(right));
        }

        false
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(s)
}

fn parse_needs_reference(expr: &str) -> Option<(&str, &str)> {
    let rest = expr.strip_prefix("needs.")?;
    let idx = rest.find(".outputs.")?;
    Some((&rest[..idx], &rest[idx + ".outputs.".len()..]))
}

/// All `needs.<job>.outputs.<key>` references in `input`, as `(job, key)`.
pub fn needs_references(input: &str) -> Vec<(String, String)> {
    EXPRESSION
        .captures_iter(input)
        .filter_map(|caps| {
            let expr = caps.get(1)?.as_str().trim();
            parse_needs_reference(expr).map(|(j, k)| (j.to_string(), k.to_string()))
        })
        .collect()
}
