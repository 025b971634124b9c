/// Error taxonomy for the metadata store
///
/// Missing objects and corrupt files are not errors on read paths: lookups return
/// `None` or skip the entry. Only caller mistakes and filesystem write failures
/// surface here.

use std::{io, path::PathBuf};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// A name or request body is unusable (bad path component, bad regex, empty tag)
    #[error("invalid request: {0}")]
    Validation(String),

    /// Filesystem failure while writing or creating directories
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
