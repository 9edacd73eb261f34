//! DAG resolution for pipeline jobs.

use crate::job::Job;
use gantry_core::JobId;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in job dependencies involving '{0}'")]
    CycleDetected(JobId),
    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: JobId, dependency: JobId },
    #[error("Duplicate job: {0}")]
    DuplicateJob(JobId),
    #[error("Empty pipeline")]
    EmptyPipeline,
}

impl From<DagError> for gantry_core::Error {
    fn from(err: DagError) -> Self {
        gantry_core::Error::InvalidPipeline(err.to_string())
    }
}

/// Directed acyclic graph of jobs. Edges point from a dependency to its
/// dependent.
#[derive(Debug)]
pub struct PipelineDag {
    graph: DiGraph<Job, ()>,
    index: HashMap<JobId, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl PipelineDag {
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Jobs with no dependencies.
    pub fn roots(&self) -> Vec<&Job> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Jobs that declare a direct dependency on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&Job> {
        self.index
            .get(id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every job reachable from `id` through dependency edges.
    pub fn transitive_dependents(&self, id: &str) -> HashSet<JobId> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(self.graph[next].id.clone()) {
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Jobs in dependency order. Ties keep declaration order.
    pub fn topological_order(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().map(|&idx| &self.graph[idx])
    }

    /// Group jobs into batches: every job lands one batch after the latest
    /// of its dependencies, so jobs in the same batch are independent.
    pub fn batches(&self) -> Vec<Vec<JobId>> {
        let all: HashSet<JobId> = self.index.keys().cloned().collect();
        self.batches_for(&all)
    }

    /// Batching restricted to `included`; dependencies outside the set do
    /// not push a job later.
    pub(crate) fn batches_for(&self, included: &HashSet<JobId>) -> Vec<Vec<JobId>> {
        let mut level: HashMap<&JobId, usize> = HashMap::new();
        let mut batches: Vec<Vec<JobId>> = Vec::new();

        for job in self.topological_order() {
            if !included.contains(&job.id) {
                continue;
            }
            let lvl = job
                .needs
                .iter()
                .filter_map(|dep| level.get(dep))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(&job.id, lvl);
            if batches.len() <= lvl {
                batches.resize_with(lvl + 1, Vec::new);
            }
            batches[lvl].push(job.id.clone());
        }

        for batch in &mut batches {
            batch.sort();
        }
        batches
    }
}

/// Builder for constructing pipeline DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a DAG from jobs, rejecting unknown dependencies and cycles.
    pub fn build(&self, jobs: Vec<Job>) -> Result<PipelineDag, DagError> {
        if jobs.is_empty() {
            return Err(DagError::EmptyPipeline);
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for job in jobs {
            let id = job.id.clone();
            if index.contains_key(&id) {
                return Err(DagError::DuplicateJob(id));
            }
            let idx = graph.add_node(job);
            index.insert(id, idx);
        }

        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            let job = &graph[idx];
            for dep in &job.needs {
                let dep_idx = index.get(dep).ok_or_else(|| DagError::UnknownDependency {
                    job: job.id.clone(),
                    dependency: dep.clone(),
                })?;
                edges.push((*dep_idx, idx));
            }
        }
        for (from, to) in edges {
            graph.update_edge(from, to, ());
        }

        // Verify no cycles
        let order = toposort(&graph, None)
            .map_err(|cycle| DagError::CycleDetected(graph[cycle.node_id()].id.clone()))?;
        let order = stable_order(&graph, order);

        Ok(PipelineDag {
            graph,
            index,
            order,
        })
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's algorithm preferring the lowest node index, which makes the order
/// independent of petgraph's traversal details.
fn stable_order(graph: &DiGraph<Job, ()>, topo: Vec<NodeIndex>) -> Vec<NodeIndex> {
    let mut indegree: HashMap<NodeIndex, usize> = topo
        .iter()
        .map(|&idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();
    let mut ready: std::collections::BTreeSet<NodeIndex> = indegree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&idx, _)| idx)
        .collect();
    let mut order = Vec::with_capacity(topo.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(d) = indegree.get_mut(&next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(next);
                }
            }
        }
    }
    order
}
