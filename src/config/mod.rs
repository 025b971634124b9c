/// Configuration management for the local metadata service
///
/// Handles server binding, datastore location and daemon lifecycle parameters.
/// Values come from environment variables; CLI flags override them in `main`.

use crate::runtime::idle::{DEFAULT_CHECK_INTERVAL, DEFAULT_IDLE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Datastore configuration
    pub store: StoreConfig,
    /// Daemon lifecycle configuration
    pub daemon: DaemonConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (loopback by default, the service is machine-local)
    pub host: String,
    /// Server port number; 0 picks a free port
    pub port: u16,
}

/// Datastore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Parent directory of `.metaflow/` (default: current directory)
    pub root_path: PathBuf,
}

/// Daemon lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds without heartbeats before the daemon exits
    pub idle_timeout_secs: u64,
    /// Seconds between idle checks
    pub check_interval_secs: u64,
    /// Directory holding the discovery record and PID file
    pub state_dir: PathBuf,
    /// Verbose logging, daemon output kept in the state directory
    pub debug: bool,
}

impl Default for Config {
    /// Default configuration with environment variable overrides
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("LOCALMETA_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_parse("LOCALMETA_PORT", 0),
            },
            store: StoreConfig {
                root_path: std::env::var_os("LOCALMETA_ROOT")
                    .map(PathBuf::from)
                    .or_else(|| std::env::current_dir().ok())
                    .unwrap_or_else(|| PathBuf::from(".")),
            },
            daemon: DaemonConfig {
                idle_timeout_secs: env_parse("LOCALMETA_IDLE_TIMEOUT", DEFAULT_IDLE_TIMEOUT.as_secs()),
                check_interval_secs: env_parse("LOCALMETA_CHECK_INTERVAL", DEFAULT_CHECK_INTERVAL.as_secs()),
                state_dir: default_state_dir(),
                debug: std::env::var("LOCALMETA_DEBUG")
                    .map(|v| is_truthy(&v))
                    .unwrap_or(false),
            },
        }
    }
}

/// `$LOCALMETA_STATE_DIR`, else `~/.localmeta`
fn default_state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("LOCALMETA_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".localmeta")
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", " yes "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "", "no", "off"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn unparsable_env_falls_back() {
        assert_eq!(env_parse::<u64>("LOCALMETA_TEST_UNSET_VARIABLE", 300), 300);
    }
}
