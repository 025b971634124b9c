/// Start, stop and discover the machine-wide daemon
///
/// The supervisor runs in the CLI process. It reads the discovery record to find a
/// running daemon, self-heals stale records, spawns a detached `serve` process and
/// waits for it to answer `/ping` before reporting success.

use crate::{
    config::Config,
    daemon::{
        process::{find_free_port, is_alive, spawn_detached, terminate},
        state::{DaemonState, StateDir},
    },
};
use std::{
    io,
    path::{Path, PathBuf},
    process::Child,
    time::Duration,
};
use thiserror::Error;
use tokio::time::Instant;

/// How long `start` waits for the daemon to answer
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const PING_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DaemonError {
    /// The spawned process never became reachable; it has been killed
    #[error(
        "metadata service failed to start on port {port} within {}s.\n\
         The service binary or one of its runtime dependencies may be missing, or the port is taken.\n\
         Run with LOCALMETA_DEBUG=1 and check {} for details.",
        .waited.as_secs(),
        .log.display()
    )]
    StartupTimeout {
        port: u16,
        waited: Duration,
        log: PathBuf,
    },

    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare daemon startup: {0}")]
    Setup(#[from] io::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parameters of a daemon launch
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Port to listen on; 0 picks a free one
    pub port: u16,
    /// Parent directory of the datastore
    pub root: PathBuf,
    pub idle_timeout: Duration,
    /// Keep daemon output in the state directory
    pub debug: bool,
}

impl StartOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.server.port,
            root: config.store.root_path.clone(),
            idle_timeout: Duration::from_secs(config.daemon.idle_timeout_secs),
            debug: config.daemon.debug,
        }
    }
}

/// Lifecycle of the machine-wide daemon
///
/// The daemon moves through four states, observed here as follows:
/// - Absent: `status()` is `None` (no record, or a stale one it just removed)
/// - Starting: inside `start`, between spawn and the first successful `/ping`;
///   on timeout the child is killed and the daemon is Absent again
/// - Running: `status()` is `Some`, the recorded pid is alive
/// - Stopping: after `stop` sent SIGTERM; the record is already cleared, so
///   callers see Absent while the process finishes its graceful shutdown
#[derive(Debug, Clone)]
pub struct Supervisor {
    state_dir: StateDir,
    program: PathBuf,
    startup_timeout: Duration,
}

impl Supervisor {
    /// Supervisor using `state_dir` for discovery and `program` as the daemon binary
    pub fn new(state_dir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: StateDir::new(state_dir),
            program: program.into(),
            startup_timeout: STARTUP_TIMEOUT,
        }
    }

    /// Supervisor for the configured state directory, launching the current executable
    pub fn from_config(config: &Config) -> io::Result<Self> {
        Ok(Self::new(&config.daemon.state_dir, std::env::current_exe()?))
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    /// The running daemon, if any
    ///
    /// A record naming a dead process is deleted and reported as not running.
    pub fn status(&self) -> Option<DaemonState> {
        let state = self.state_dir.read()?;
        if is_alive(state.pid) {
            return Some(state);
        }
        tracing::info!("Removing stale discovery record for pid {}", state.pid);
        self.state_dir.clear();
        None
    }

    /// Launch the daemon unless one is already running
    pub async fn start(&self, options: &StartOptions) -> Result<DaemonState, DaemonError> {
        if let Some(existing) = self.status() {
            tracing::info!("Daemon already running: pid={} url={}", existing.pid, existing.url());
            return Ok(existing);
        }

        let port = match options.port {
            0 => find_free_port()?,
            port => port,
        };
        let root = absolute(&options.root)?;
        std::fs::create_dir_all(self.state_dir.path())?;

        let args = vec![
            "serve".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--root".to_string(),
            root.display().to_string(),
            "--idle-timeout".to_string(),
            options.idle_timeout.as_secs().to_string(),
            "--state-dir".to_string(),
            self.state_dir.path().display().to_string(),
        ];
        let log_file = self.state_dir.log_file();
        let log = options.debug.then_some(log_file.as_path());

        tracing::info!("Launching daemon on port {} for {}", port, root.display());
        let mut child = spawn_detached(&self.program, &args, log).map_err(|source| DaemonError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let state = DaemonState::new(child.id(), port, root);

        let client = reqwest::Client::builder().timeout(PING_TIMEOUT).build()?;
        let ping_url = format!("{}/ping", state.url());
        let started = Instant::now();
        while started.elapsed() < self.startup_timeout {
            if let Ok(response) = client.get(&ping_url).send().await {
                if response.status().is_success() {
                    tracing::info!("Daemon ready: pid={} url={}", state.pid, state.url());
                    return Ok(state);
                }
            }
            if let Ok(Some(exit)) = child.try_wait() {
                tracing::warn!("Daemon exited during startup: {}", exit);
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        discard(child).await;
        Err(DaemonError::StartupTimeout {
            port,
            waited: started.elapsed(),
            log: log_file,
        })
    }

    /// Alias of [`Supervisor::start`] for callers that just need a daemon
    pub async fn ensure_running(&self, options: &StartOptions) -> Result<DaemonState, DaemonError> {
        self.start(options).await
    }

    /// Ask the daemon to exit and clear its record; false when none was running
    pub fn stop(&self) -> bool {
        let Some(state) = self.status() else {
            return false;
        };
        if terminate(state.pid) {
            tracing::info!("Sent SIGTERM to daemon pid {}", state.pid);
        } else {
            tracing::debug!("Daemon pid {} already gone", state.pid);
        }
        self.state_dir.clear();
        true
    }
}

/// Kill a child that never became ready and reap it on the blocking pool
async fn discard(mut child: Child) {
    let reaped = tokio::task::spawn_blocking(move || {
        let _ = child.kill();
        child.wait()
    })
    .await;
    match reaped {
        Ok(Ok(status)) => tracing::debug!("Discarded daemon child: {}", status),
        Ok(Err(e)) => tracing::warn!("Failed to reap daemon child: {}", e),
        Err(e) => tracing::warn!("Reaping daemon child aborted: {}", e),
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
