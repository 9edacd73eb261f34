//! Run-scoped artifact storage for Gantry.
//!
//! Two [`ArtifactStore`](gantry_core::ports::ArtifactStore) implementations:
//! an in-memory store for tests and single-process runs, and a filesystem
//! store that keeps zstd-compressed blobs under `<root>/<run>/<job>/<name>`.

pub mod archiver;
pub mod compression;
pub mod filesystem;
pub mod keys;
pub mod memory;

pub use compression::{CompressionType, compress, decompress};
pub use filesystem::FilesystemArtifactStore;
pub use keys::{digest, sanitize_key, verify_digest};
pub use memory::MemoryArtifactStore;
