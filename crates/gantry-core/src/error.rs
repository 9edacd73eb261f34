//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Pipeline errors
    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Contract violation in job '{job}': {reason}")]
    ContractViolation { job: String, reason: String },

    #[error("Loop guard misconfigured: {0}")]
    LoopGuard(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{tool}' could not be invoked: {message}")]
    ToolInvocation { tool: String, message: String },

    // Artifact errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact digest mismatch for {name}: expected {expected}, got {actual}")]
    ArtifactIntegrity {
        name: String,
        expected: String,
        actual: String,
    },

    // Deployment errors
    #[error("Deployment descriptor does not match: {0}")]
    DescriptorMismatch(String),

    #[error("Version control error: {0}")]
    Vcs(String),

    // History errors
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Run history error: {0}")]
    RunHistory(String),

    // Infrastructure errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn contract(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ContractViolation {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that describe a broken pipeline configuration rather
    /// than a transient runtime condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidPipeline(_)
                | Error::ContractViolation { .. }
                | Error::LoopGuard(_)
                | Error::JobNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
