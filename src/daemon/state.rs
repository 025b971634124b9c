/// Discovery record persistence
///
/// A running daemon is described by `state.json` (`{pid, port, root_path,
/// started_at}`) plus a plain-text `pid` file, both in a per-user state directory.
/// Any local process can read them to find the service. Only the owning daemon
/// writes its record, and every write is atomic.

use crate::store::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const STATE_FILE: &str = "state.json";
pub const PID_FILE: &str = "pid";
pub const LOG_FILE: &str = "daemon.log";

/// Snapshot of a running daemon's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub port: u16,
    /// Parent directory of the datastore the daemon serves
    pub root_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl DaemonState {
    pub fn new(pid: u32, port: u16, root_path: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            port,
            root_path: root_path.into(),
            started_at: Utc::now(),
        }
    }

    /// Base URL clients should use
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// The state directory holding discovery files
#[derive(Debug, Clone)]
pub struct StateDir {
    dir: PathBuf,
}

impl StateDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Persist the record and PID file
    pub fn write(&self, state: &DaemonState) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.state_file(), &json)?;
        write_atomic(&self.pid_file(), state.pid.to_string().as_bytes())?;
        tracing::debug!("Wrote discovery record to {}", self.dir.display());
        Ok(())
    }

    /// Load the record; `None` when missing or unreadable
    pub fn read(&self) -> Option<DaemonState> {
        let bytes = fs::read(self.state_file()).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring malformed discovery record: {}", e);
                None
            }
        }
    }

    /// Remove both files; already-missing files are fine
    pub fn clear(&self) {
        for path in [self.state_file(), self.pid_file()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }

    /// Remove the record only if it still describes process `pid`
    ///
    /// Used by an exiting daemon so it never deletes the record of a newer instance.
    pub fn clear_if_owned(&self, pid: u32) {
        match self.read() {
            Some(state) if state.pid != pid => {
                tracing::debug!("Discovery record belongs to pid {}, leaving it", state.pid)
            }
            _ => self.clear(),
        }
    }
}
