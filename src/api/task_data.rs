/// Per-task artifacts and metadata

use crate::{
    api::{one_or_many, store_call, AppState},
    store::{Artifact, MetadataEntry},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

type TaskPath = Path<(String, String, String, String)>;

/// Create artifact, metadata and filtered-task routes
pub fn create_task_data_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}/artifact",
            post(register_artifacts),
        )
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}/artifacts",
            get(list_artifacts),
        )
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}/attempt/{attempt}/artifacts",
            get(list_attempt_artifacts),
        )
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}/metadata",
            get(list_metadata).post(register_metadata),
        )
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/filtered_tasks",
            get(filtered_tasks),
        )
}

#[derive(Debug, Deserialize)]
struct ArtifactQuery {
    attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FilterQuery {
    #[serde(default)]
    metadata_field_name: String,
    #[serde(default = "match_everything")]
    pattern: String,
}

fn match_everything() -> String {
    ".*".to_string()
}

async fn register_artifacts(
    State(state): State<AppState>,
    Path((flow, run, step, task)): TaskPath,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let artifacts: Vec<Artifact> = one_or_many(&body)?;
    store_call(&state, move |store| {
        store.register_artifacts(&flow, &run, &step, &task, &artifacts)
    })
    .await?;
    Ok(Json(json!({})))
}

async fn list_artifacts(
    State(state): State<AppState>,
    Path((flow, run, step, task)): TaskPath,
    Query(query): Query<ArtifactQuery>,
) -> Result<Json<Vec<Artifact>>, StatusCode> {
    let artifacts = store_call(&state, move |store| {
        store.get_artifacts(&flow, &run, &step, &task, query.attempt)
    })
    .await?;
    Ok(Json(artifacts))
}

async fn list_attempt_artifacts(
    State(state): State<AppState>,
    Path((flow, run, step, task, attempt)): Path<(String, String, String, String, u32)>,
) -> Result<Json<Vec<Artifact>>, StatusCode> {
    let artifacts = store_call(&state, move |store| {
        store.get_artifacts(&flow, &run, &step, &task, Some(attempt))
    })
    .await?;
    Ok(Json(artifacts))
}

async fn register_metadata(
    State(state): State<AppState>,
    Path((flow, run, step, task)): TaskPath,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let entries: Vec<MetadataEntry> = one_or_many(&body)?;
    store_call(&state, move |store| {
        store.register_metadata(&flow, &run, &step, &task, &entries)
    })
    .await?;
    Ok(Json(json!({})))
}

async fn list_metadata(
    State(state): State<AppState>,
    Path((flow, run, step, task)): TaskPath,
) -> Result<Json<Vec<MetadataEntry>>, StatusCode> {
    let entries = store_call(&state, move |store| {
        store.get_metadata(&flow, &run, &step, &task)
    })
    .await?;
    Ok(Json(entries))
}

/// Pathspecs of the step's tasks whose metadata field matches the pattern
async fn filtered_tasks(
    State(state): State<AppState>,
    Path((flow, run, step)): Path<(String, String, String)>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let pathspecs = store_call(&state, move |store| {
        store.filter_tasks_by_metadata(
            &flow,
            &run,
            &step,
            &query.metadata_field_name,
            &query.pattern,
        )
    })
    .await?;
    Ok(Json(pathspecs))
}
