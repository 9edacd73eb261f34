//! Gantry Core
//!
//! Core domain types, traits, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: trigger contexts, job definitions and
//! results, artifact references, history records and the ports through
//! which external tools and stores are reached.

pub mod artifact;
pub mod error;
pub mod ids;
pub mod interpolation;
pub mod loop_guard;
pub mod pipeline;
pub mod ports;
pub mod records;
pub mod run;
pub mod trigger;

pub use error::{Error, Result};
pub use ids::*;
