//! Shared runner types.

use std::path::PathBuf;

/// Output line from a tool process.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub job: String,
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Configuration for host process execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pass the parent process environment through to tools.
    pub inherit_env: bool,
    /// Directory for per-job scratch space (output file, artifact dirs).
    pub scratch_root: PathBuf,
    /// Keep scratch directories after the job for debugging.
    pub keep_scratch: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inherit_env: true,
            scratch_root: std::env::temp_dir().join("gantry"),
            keep_scratch: false,
        }
    }
}
