//! Integration test infrastructure for Gantry.
//!
//! Provides in-process fakes for the external collaborators (tools, version
//! control, registry, run history) and fixtures for a typical
//! build → publish → deploy → cleanup pipeline, so whole runs can be driven
//! without a hosted CI environment.
//!
//! # Usage
//!
//! ```ignore
//! use gantry_tests::{Harness, TriggerFixture};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = Harness::new().unwrap();
//!     let report = harness.run(TriggerFixture::push_main(["src/app.js"])).await.unwrap();
//! }
//! ```

pub mod fakes;
pub mod fixtures;

pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_scheduler=debug,gantry_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
