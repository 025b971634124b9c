/// Process Supervisor
///
/// Manages the single background service instance of this machine:
/// - Discovery record (state.json + pid file) persistence
/// - OS process helpers (liveness, termination, detached spawn, port allocation)
/// - The supervisor used by the CLI to start, stop and query the daemon

// Discovery record under the per-user state directory
pub mod state;

// kill(2)-based probing, setsid spawning, free port lookup
pub mod process;

// status / start / stop / ensure_running
pub mod supervisor;

// Re-export main types
pub use state::{DaemonState, StateDir};
pub use supervisor::{DaemonError, StartOptions, Supervisor};
