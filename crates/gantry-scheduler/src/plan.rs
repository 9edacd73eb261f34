//! Execution planning.
//!
//! `plan` is a pure function of the DAG and the trigger context: it decides
//! which jobs are skipped before anything runs, groups the remaining jobs
//! into batches, and rejects dependency contracts that could never be
//! satisfied.

use crate::dag::PipelineDag;
use crate::job::Job;
use gantry_core::interpolation::needs_references;
use gantry_core::run::SkipReason;
use gantry_core::trigger::TriggerContext;
use gantry_core::{Error, JobId, Result, RunId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// The schedule for one run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub run_id: RunId,
    pub trigger: Arc<TriggerContext>,
    pub variables: HashMap<String, String>,
    /// Jobs to dispatch, batched by dependency depth.
    pub batches: Vec<Vec<JobId>>,
    /// Jobs skipped at planning time.
    pub skipped: BTreeMap<JobId, SkipReason>,
    dag: Arc<PipelineDag>,
}

impl ExecutionPlan {
    pub fn dag(&self) -> &PipelineDag {
        &self.dag
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &JobId> {
        self.batches.iter().flatten()
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.scheduled().any(|j| j.as_str() == id)
    }

    /// True when no job will be dispatched.
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Vec::is_empty)
    }
}

/// Check the contracts that do not depend on the trigger: artifact and
/// output references must follow declared dependency edges.
pub fn validate_contracts(dag: &PipelineDag) -> Result<()> {
    for job in dag.topological_order() {
        for dep in &job.consumes {
            if !job.needs.iter().any(|n| n.as_str() == dep.job) {
                return Err(Error::contract(
                    job.id.as_str(),
                    format!(
                        "consumes artifact '{}' from '{}' without declaring it in needs",
                        dep.name, dep.job
                    ),
                ));
            }
            let producer = dag
                .job(&dep.job)
                .ok_or_else(|| Error::JobNotFound(dep.job.clone()))?;
            if !producer.produces.contains(&dep.name) {
                return Err(Error::contract(
                    job.id.as_str(),
                    format!("job '{}' does not produce artifact '{}'", dep.job, dep.name),
                ));
            }
        }

        for template in job.body.templates() {
            for (needed, key) in needs_references(template) {
                check_output_reference(dag, job, &needed, &key)?;
            }
        }
    }
    Ok(())
}

fn check_output_reference(dag: &PipelineDag, job: &Job, needed: &str, key: &str) -> Result<()> {
    if !job.needs.iter().any(|n| n.as_str() == needed) {
        return Err(Error::contract(
            job.id.as_str(),
            format!("reads output '{}' of '{}' without declaring it in needs", key, needed),
        ));
    }
    let producer = dag
        .job(needed)
        .ok_or_else(|| Error::JobNotFound(needed.to_string()))?;
    if !producer.outputs.iter().any(|o| o == key) {
        return Err(Error::contract(
            job.id.as_str(),
            format!("job '{}' does not declare output '{}'", needed, key),
        ));
    }
    Ok(())
}

/// Build the execution plan for a run.
pub fn plan(
    dag: Arc<PipelineDag>,
    trigger: Arc<TriggerContext>,
    variables: HashMap<String, String>,
) -> Result<ExecutionPlan> {
    validate_contracts(&dag)?;

    let mut skipped: BTreeMap<JobId, SkipReason> = BTreeMap::new();
    let mut scheduled: HashSet<JobId> = HashSet::new();

    for job in dag.topological_order() {
        if !job.gate.evaluate(&trigger, &variables) {
            debug!(job = %job.id, "Gate closed");
            skipped.insert(job.id.clone(), SkipReason::Gated);
            continue;
        }

        if !job.always
            && let Some(dep) = job.needs.iter().find(|d| skipped.contains_key(*d))
        {
            skipped.insert(
                job.id.clone(),
                SkipReason::DependencyNotMet {
                    dependency: dep.clone(),
                },
            );
            continue;
        }

        scheduled.insert(job.id.clone());
    }

    // A scheduled consumer whose producer will never run cannot resolve its
    // artifact; report it now instead of at fetch time.
    for job in dag.topological_order() {
        if !scheduled.contains(&job.id) {
            continue;
        }
        if let Some(dep) = job
            .consumes
            .iter()
            .find(|dep| skipped.contains_key(dep.job.as_str()))
        {
            return Err(Error::contract(
                job.id.as_str(),
                format!(
                    "artifact '{}' comes from '{}', which is skipped for this trigger",
                    dep.name, dep.job
                ),
            ));
        }
    }

    let batches = dag.batches_for(&scheduled);

    Ok(ExecutionPlan {
        run_id: RunId::new(),
        trigger,
        variables,
        batches,
        skipped,
        dag,
    })
}
