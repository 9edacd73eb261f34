//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};
use gantry_core::trigger::EventKind;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter gantry.yaml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate pipeline configuration
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,
    },

    /// Show which jobs a trigger would run, without running them
    Plan {
        /// Path to pipeline file
        #[arg(short, long, default_value = "gantry.yaml", env = "GANTRY_PIPELINE")]
        pipeline: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Run the pipeline for a trigger
    Run {
        /// Path to pipeline file
        #[arg(short, long, default_value = "gantry.yaml", env = "GANTRY_PIPELINE")]
        pipeline: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,

        /// Directory jobs run in (defaults to the pipeline file's directory)
        #[arg(long, env = "GANTRY_WORKSPACE")]
        workspace: Option<PathBuf>,

        /// Directory for run-scoped artifacts
        #[arg(long, env = "GANTRY_ARTIFACTS_DIR")]
        artifacts_dir: Option<PathBuf>,

        /// Maximum number of jobs running at once
        #[arg(long, env = "GANTRY_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Point the deployment descriptor at a new image and commit it
    Deploy {
        /// Full image reference, e.g. ghcr.io/org/repo:sha-abc123
        image: String,

        /// Path to pipeline file holding the deploy section
        #[arg(short, long, default_value = "gantry.yaml", env = "GANTRY_PIPELINE")]
        pipeline: PathBuf,

        /// Repository root the descriptor path is relative to
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Push after committing, overriding the deploy section
        #[arg(long)]
        push: bool,
    },

    /// Apply the retention policy to the registry and run history
    Cleanup {
        /// Path to pipeline file holding the retention section
        #[arg(short, long, default_value = "gantry.yaml", env = "GANTRY_PIPELINE")]
        pipeline: PathBuf,

        /// Number of tagged images and runs to keep
        #[arg(long)]
        keep_last: Option<usize>,

        /// Run id that must never be deleted
        #[arg(long, env = "GANTRY_CLEANUP_EXCLUDE_RUN")]
        exclude_run: Option<String>,

        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the JSON schema of gantry.yaml
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Where the trigger context comes from: an event file, or flags.
#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// JSON file holding a trigger context; flags below are ignored when set
    #[arg(long, env = "GANTRY_EVENT")]
    pub event: Option<PathBuf>,

    /// Event kind
    #[arg(long = "event-kind", value_enum, default_value = "push")]
    pub kind: EventArg,

    /// Branch or ref (defaults to the configured default branch)
    #[arg(long = "ref", env = "GANTRY_REF")]
    pub git_ref: Option<String>,

    /// Commit sha
    #[arg(long, env = "GANTRY_SHA", default_value = "0000000")]
    pub sha: String,

    /// Changed path (repeatable)
    #[arg(long = "changed", value_name = "PATH")]
    pub changed: Vec<String>,

    /// Head commit message
    #[arg(long)]
    pub message: Option<String>,

    /// Who caused the event
    #[arg(long)]
    pub actor: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventArg {
    Push,
    PullRequest,
    Schedule,
    Manual,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
            EventArg::Schedule => EventKind::Schedule,
            EventArg::Manual => EventKind::Manual,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
