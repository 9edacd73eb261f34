//! Runtime job model.
//!
//! A [`Job`] is the schedulable form of a [`JobDefinition`]: the gate is a
//! value that can be evaluated against a trigger context, and timeouts are
//! resolved to durations.

use crate::triggers::glob_match;
use gantry_core::JobId;
use gantry_core::interpolation::InterpolationContext;
use gantry_core::pipeline::{ArtifactDependency, JobCondition, JobDefinition, RetryConfig};
use gantry_core::trigger::TriggerContext;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type Predicate = Arc<dyn Fn(&TriggerContext) -> bool + Send + Sync>;

/// Gating predicate deciding whether a job runs at all.
#[derive(Clone, Default)]
pub enum Gate {
    #[default]
    Always,
    Condition(JobCondition),
    Custom(Predicate),
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Always => write!(f, "Always"),
            Gate::Condition(c) => f.debug_tuple("Condition").field(c).finish(),
            Gate::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Gate {
    pub fn evaluate(&self, ctx: &Arc<TriggerContext>, variables: &HashMap<String, String>) -> bool {
        match self {
            Gate::Always => true,
            Gate::Custom(predicate) => predicate(ctx),
            Gate::Condition(condition) => condition_matches(condition, ctx, variables),
        }
    }
}

fn condition_matches(
    condition: &JobCondition,
    ctx: &Arc<TriggerContext>,
    variables: &HashMap<String, String>,
) -> bool {
    if !condition.events.is_empty() && !condition.events.contains(&ctx.event) {
        return false;
    }

    if !condition.branches.is_empty()
        && !condition.branches.iter().any(|p| glob_match(p, ctx.branch()))
    {
        return false;
    }

    if !condition.paths.is_empty()
        && !ctx
            .changed_paths
            .iter()
            .any(|path| condition.paths.iter().any(|p| glob_match(p, path)))
    {
        return false;
    }

    if !condition.paths_ignore.is_empty()
        && !ctx.changed_paths.is_empty()
        && ctx
            .changed_paths
            .iter()
            .all(|path| condition.paths_ignore.iter().any(|p| glob_match(p, path)))
    {
        return false;
    }

    if let Some(expr) = &condition.expression {
        let mut interp = InterpolationContext::with_trigger(ctx.clone());
        interp.variables = variables.clone();
        if !interp.evaluate(expr) {
            return false;
        }
    }

    true
}

/// The body of a job: which tool to call and how.
#[derive(Debug, Clone, Default)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Vec<String>,
    pub working_directory: Option<String>,
    pub env: HashMap<String, String>,
}

impl ToolInvocation {
    /// Every string that is interpolated before dispatch.
    pub(crate) fn templates(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(String::as_str)
            .chain(self.env.values().map(String::as_str))
            .chain(self.working_directory.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub display_name: Option<String>,
    pub needs: Vec<JobId>,
    pub gate: Gate,
    pub always: bool,
    pub body: ToolInvocation,
    pub outputs: Vec<String>,
    pub produces: Vec<String>,
    pub consumes: Vec<ArtifactDependency>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryConfig>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            needs: Vec::new(),
            gate: Gate::Always,
            always: false,
            body: ToolInvocation {
                tool: tool.into(),
                ..ToolInvocation::default()
            },
            outputs: Vec::new(),
            produces: Vec::new(),
            consumes: Vec::new(),
            timeout: None,
            retry: None,
        }
    }

    pub fn from_definition(def: &JobDefinition) -> Self {
        Self {
            id: JobId::new(&def.name),
            display_name: def.display_name.clone(),
            needs: def.needs.iter().map(JobId::new).collect(),
            gate: def
                .condition
                .clone()
                .map(Gate::Condition)
                .unwrap_or_default(),
            always: def.always,
            body: ToolInvocation {
                tool: def.tool.clone(),
                args: def.args.clone(),
                working_directory: def.working_directory.clone(),
                env: def.env.clone(),
            },
            outputs: def.outputs.clone(),
            produces: def.produces.clone(),
            consumes: def.consumes.clone(),
            timeout: def
                .timeout_minutes
                .map(|m| Duration::from_secs(u64::from(m) * 60)),
            retry: def.retry.clone(),
        }
    }

    pub fn needs<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<JobId>,
    {
        self.needs = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.env.insert(key.into(), value.into());
        self
    }

    pub fn when(mut self, predicate: impl Fn(&TriggerContext) -> bool + Send + Sync + 'static) -> Self {
        self.gate = Gate::Custom(Arc::new(predicate));
        self
    }

    pub fn condition(mut self, condition: JobCondition) -> Self {
        self.gate = Gate::Condition(condition);
        self
    }

    /// Run regardless of upstream outcome.
    pub fn always(mut self) -> Self {
        self.always = true;
        self
    }

    pub fn outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn produces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn consumes(mut self, job: impl Into<String>, name: impl Into<String>) -> Self {
        self.consumes.push(ArtifactDependency {
            job: job.into(),
            name: name.into(),
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}
