/// Metadata Store Layer
///
/// Persists the flow / run / step / task hierarchy directly on disk. It provides:
/// - Record types shared with the HTTP API
/// - A directory-tree object store with atomic writes
/// - Run and task identifier generation
/// - Entity-level operations (idempotent creation, artifacts, metadata, tags)
///
/// Nothing in this module knows about HTTP or the daemon lifecycle.

// Error taxonomy for store operations
pub mod error;

// Record definitions (flows, runs, steps, tasks, artifacts, metadata)
pub mod types;

// Directory-tree storage engine
pub mod storage;

// Run ID logical clock and per-run task ID allocator
pub mod ids;

// Entity-level operations over the storage engine
pub mod metadata;

// Re-export commonly used types
pub use error::{StoreError, StoreResult};
pub use metadata::MetadataStore;
pub use storage::ObjectStore;
pub use types::{Artifact, FlowRecord, MetadataEntry, ObjectBody, RunRecord, StepRecord, TagMutation, TaskRecord};
