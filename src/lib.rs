/// localmeta: a local metadata service for workflow runs
///
/// Records flows, runs, steps, tasks, artifacts and task metadata in a directory
/// tree on disk, serves them over HTTP, and manages a machine-wide background
/// daemon that shuts itself down when no run has sent a heartbeat for a while.

// Core configuration and setup
pub mod config;

// Filesystem object store, identifier generation and entity operations
pub mod store;

// Process-wide liveness state and the idle monitor
pub mod runtime;

// Daemon discovery records and process supervision
pub mod daemon;

// HTTP API layer - REST endpoints of the workflow client's metadata service
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use daemon::{DaemonState, Supervisor};
pub use server::{create_app, start_server};
pub use store::{MetadataStore, StoreError};
