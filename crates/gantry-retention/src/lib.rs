//! Gantry Retention
//!
//! Keeps the image registry and the run history bounded: the newest K tagged
//! images and the newest K runs survive, everything else is deleted on a
//! best-effort basis.

pub mod cleaner;
pub mod github;
pub mod policy;
pub mod tool;

pub use cleaner::{CleanupReport, RetentionCleaner};
pub use github::{GithubClient, GithubError, GithubPackageRegistry, GithubRunHistory};
pub use policy::{RetentionPolicy, Selection};
pub use tool::CleanupTool;
