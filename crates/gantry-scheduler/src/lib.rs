//! Dependency scheduling and run execution for Gantry.

pub mod dag;
pub mod executor;
pub mod job;
pub mod plan;
pub mod scheduler;
pub mod triggers;

pub use dag::{DagBuilder, DagError, PipelineDag};
pub use executor::{CancelHandle, CancelSignal, ExecutorConfig, RunExecutor, cancellation};
pub use job::{Gate, Job, ToolInvocation};
pub use plan::{ExecutionPlan, plan, validate_contracts};
pub use scheduler::{Scheduler, validate};
pub use triggers::{IgnoreReason, TriggerDecision, TriggerMatcher};
