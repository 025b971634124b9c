/// HTTP API Layer
///
/// This module exposes the metadata store over the workflow client's REST API.
/// It handles:
/// - Health checks and heartbeats
/// - Flow / run / step / task creation and lookup, run tag mutation
/// - Artifact and metadata registration, filtered task lookup
///
/// Handlers only marshal parameters; all behavior lives in the store. Blocking
/// filesystem work runs on tokio's blocking pool.

use crate::{
    runtime::Heartbeat,
    store::{MetadataStore, StoreError, StoreResult},
};
use axum::{http::StatusCode, Router};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

// Ping and heartbeat endpoints
pub mod health;

// Flow, run, step and task endpoints
pub mod objects;

// Artifact, metadata and filtered-task endpoints
pub mod task_data;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Filesystem-backed metadata store
    pub store: Arc<MetadataStore>,
    /// Liveness timestamp read by the idle monitor
    pub heartbeat: Arc<Heartbeat>,
}

/// Create all API routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::create_health_routes())
        .merge(objects::create_object_routes())
        .merge(task_data::create_task_data_routes())
}

/// Run a store operation on the blocking pool
///
/// The outer error is a failed join (the operation panicked).
pub(crate) async fn blocking<T, F>(state: &AppState, op: F) -> Result<StoreResult<T>, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&MetadataStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| {
            tracing::error!("Store operation aborted: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Run a store operation and map its error to a status code
pub(crate) async fn store_call<T, F>(state: &AppState, op: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&MetadataStore) -> StoreResult<T> + Send + 'static,
{
    blocking(state, op).await?.map_err(|e| status_for(&e))
}

/// Map a store error onto the HTTP status the client expects
pub(crate) fn status_for(error: &StoreError) -> StatusCode {
    match error {
        StoreError::NotFound(what) => {
            tracing::debug!("Not found: {}", what);
            StatusCode::NOT_FOUND
        }
        StoreError::Validation(message) => {
            tracing::warn!("Rejected request: {}", message);
            StatusCode::BAD_REQUEST
        }
        StoreError::Io { .. } | StoreError::Serialize(_) => {
            tracing::error!("Store failure: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Parse a request body leniently: empty or malformed bodies become `T::default()`
pub(crate) fn lenient_body<T: DeserializeOwned + Default>(body: &str) -> T {
    if body.trim().is_empty() {
        return T::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        tracing::warn!("Ignoring malformed request body: {}", e);
        T::default()
    })
}

/// Parse a body holding either one JSON object or an array of them
pub(crate) fn one_or_many<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, StatusCode> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(body).map_err(|e| {
        tracing::warn!("Invalid JSON payload: {}", e);
        StatusCode::BAD_REQUEST
    })?;
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| {
            tracing::warn!("Invalid entry in payload: {}", e);
            StatusCode::BAD_REQUEST
        })
}
