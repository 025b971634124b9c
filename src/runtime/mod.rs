/// Daemon Runtime
///
/// Lifecycle state of a running service instance:
/// - The shared heartbeat timestamp updated by liveness requests
/// - The idle monitor that ends the process after a quiet period

// Process-wide liveness timestamp
pub mod heartbeat;

// Background idle-timeout loop
pub mod idle;

// Re-export main types
pub use heartbeat::Heartbeat;
pub use idle::IdleMonitor;
