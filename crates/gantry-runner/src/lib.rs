//! Tool adapters for Gantry.

pub mod host;
pub mod outputs;
pub mod router;
pub mod runner;

pub use host::HostProcessAdapter;
pub use outputs::parse_outputs;
pub use router::ToolRouter;
pub use runner::{OutputLine, OutputStream, RunnerConfig};
