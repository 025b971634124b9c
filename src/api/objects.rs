/// Flow, run, step and task endpoints
///
/// Creation routes accept an optional JSON body with `user_name`, `tags`,
/// `system_tags` and `ts_epoch`; an empty or unreadable body is treated as `{}`.

use crate::{
    api::{blocking, lenient_body, store_call, AppState},
    store::{ObjectBody, StoreError, TagMutation},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};

/// Create flow / run / step / task routes
pub fn create_object_routes() -> Router<AppState> {
    Router::new()
        // Flows
        .route("/flows/{flow}", get(get_flow).post(create_flow))
        // Runs
        .route("/flows/{flow}/run", post(create_run))
        .route("/flows/{flow}/runs", get(list_runs))
        .route("/flows/{flow}/runs/{run}", get(get_run))
        .route("/flows/{flow}/runs/{run}/tag/mutate", patch(mutate_run_tags))
        // Steps
        .route("/flows/{flow}/runs/{run}/steps", get(list_steps))
        .route("/flows/{flow}/runs/{run}/steps/{step}", get(get_step))
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/step",
            get(get_step).post(create_step),
        )
        // Tasks
        .route("/flows/{flow}/runs/{run}/steps/{step}/tasks", get(list_tasks))
        .route("/flows/{flow}/runs/{run}/steps/{step}/task", post(create_task))
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}",
            get(get_task),
        )
}

/// Create a flow; 409 with the existing record when it is already there
async fn create_flow(
    State(state): State<AppState>,
    Path(flow): Path<String>,
    body: String,
) -> Result<Response, StatusCode> {
    let body: ObjectBody = lenient_body(&body);
    let (record, created) =
        store_call(&state, move |store| store.get_or_create_flow(&flow, body)).await?;
    Ok((created_or_conflict(created), Json(record)).into_response())
}

async fn get_flow(
    State(state): State<AppState>,
    Path(flow): Path<String>,
) -> Result<Response, StatusCode> {
    let record = store_call(&state, move |store| store.get_flow(&flow)).await?;
    found(record)
}

/// Create a run with a fresh run ID
async fn create_run(
    State(state): State<AppState>,
    Path(flow): Path<String>,
    body: String,
) -> Result<Response, StatusCode> {
    let body: ObjectBody = lenient_body(&body);
    let record = store_call(&state, move |store| store.create_run(&flow, body)).await?;
    tracing::info!("🚀 New run {}/{}", record.flow_id, record.run_number);
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn list_runs(
    State(state): State<AppState>,
    Path(flow): Path<String>,
) -> Result<Response, StatusCode> {
    let runs = store_call(&state, move |store| store.list_runs(&flow)).await?;
    Ok(Json(runs).into_response())
}

async fn get_run(
    State(state): State<AppState>,
    Path((flow, run)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    let record = store_call(&state, move |store| store.get_run(&flow, &run)).await?;
    found(record)
}

/// Add and remove run tags, returning `{"tags": [...]}` sorted
///
/// A missing run is 404; any other failure, including a malformed body, is 422.
async fn mutate_run_tags(
    State(state): State<AppState>,
    Path((flow, run)): Path<(String, String)>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let mutation: TagMutation = if body.trim().is_empty() {
        TagMutation::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("Malformed tag mutation for {}/{}: {}", flow, run, e);
            StatusCode::UNPROCESSABLE_ENTITY
        })?
    };

    match blocking(&state, move |store| store.mutate_tags(&flow, &run, &mutation)).await? {
        Ok(tags) => Ok(Json(json!({ "tags": tags }))),
        Err(StoreError::NotFound(what)) => {
            tracing::debug!("Tag mutation on missing {}", what);
            Err(StatusCode::NOT_FOUND)
        }
        Err(e) => {
            tracing::error!("Tag mutation failed: {}", e);
            Err(StatusCode::UNPROCESSABLE_ENTITY)
        }
    }
}

async fn list_steps(
    State(state): State<AppState>,
    Path((flow, run)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    let steps = store_call(&state, move |store| store.list_steps(&flow, &run)).await?;
    Ok(Json(steps).into_response())
}

async fn get_step(
    State(state): State<AppState>,
    Path((flow, run, step)): Path<(String, String, String)>,
) -> Result<Response, StatusCode> {
    let record = store_call(&state, move |store| store.get_step(&flow, &run, &step)).await?;
    found(record)
}

/// Create a step; 409 with the existing record on a duplicate
async fn create_step(
    State(state): State<AppState>,
    Path((flow, run, step)): Path<(String, String, String)>,
    body: String,
) -> Result<Response, StatusCode> {
    let body: ObjectBody = lenient_body(&body);
    let (record, created) = store_call(&state, move |store| {
        store.get_or_create_step(&flow, &run, &step, body)
    })
    .await?;
    Ok((created_or_conflict(created), Json(record)).into_response())
}

async fn list_tasks(
    State(state): State<AppState>,
    Path((flow, run, step)): Path<(String, String, String)>,
) -> Result<Response, StatusCode> {
    let tasks = store_call(&state, move |store| store.list_tasks(&flow, &run, &step)).await?;
    Ok(Json(tasks).into_response())
}

/// Create a task with the next task ID of its run
async fn create_task(
    State(state): State<AppState>,
    Path((flow, run, step)): Path<(String, String, String)>,
    body: String,
) -> Result<Response, StatusCode> {
    let body: ObjectBody = lenient_body(&body);
    let record = store_call(&state, move |store| {
        store.create_task(&flow, &run, &step, body)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn get_task(
    State(state): State<AppState>,
    Path((flow, run, step, task)): Path<(String, String, String, String)>,
) -> Result<Response, StatusCode> {
    let record = store_call(&state, move |store| {
        store.get_task(&flow, &run, &step, &task)
    })
    .await?;
    found(record)
}

fn created_or_conflict(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    }
}

fn found<T: serde::Serialize>(record: Option<T>) -> Result<Response, StatusCode> {
    match record {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(StatusCode::NOT_FOUND),
    }
}
