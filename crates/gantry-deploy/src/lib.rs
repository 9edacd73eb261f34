//! GitOps deployment for Gantry.
//!
//! Rewrites the image reference in a deployment descriptor and commits the
//! change with the pipeline's loop-breaking marker. Nothing here talks to a
//! cluster; a GitOps controller picks the commit up.

pub mod tool;
pub mod updater;
pub mod vcs;

pub use tool::DeployTool;
pub use updater::{DeploymentUpdater, UpdateOutcome};
pub use vcs::GitCli;
