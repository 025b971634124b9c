/// Liveness endpoints
///
/// `/ping` is the readiness probe used by the supervisor. Heartbeats are the only
/// requests that keep an otherwise idle daemon alive.

use crate::api::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

/// Service API version reported to clients
pub const SERVICE_VERSION: &str = "2.5.0";

/// Seconds clients wait between heartbeats
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

const VERSION_HEADER: HeaderName = HeaderName::from_static("metadata_service_version");

/// Create health and heartbeat routes
pub fn create_health_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/flows/{flow}/runs/{run}/heartbeat", post(run_heartbeat))
        .route(
            "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}/heartbeat",
            post(task_heartbeat),
        )
}

/// Readiness probe; does not count as activity
async fn ping() -> impl IntoResponse {
    (
        [(VERSION_HEADER, HeaderValue::from_static(SERVICE_VERSION))],
        "pong",
    )
}

async fn run_heartbeat(
    State(state): State<AppState>,
    Path((flow, run)): Path<(String, String)>,
) -> Json<Value> {
    state.heartbeat.beat();
    tracing::trace!("💓 Heartbeat from run {}/{}", flow, run);
    Json(heartbeat_reply())
}

async fn task_heartbeat(
    State(state): State<AppState>,
    Path((flow, run, step, task)): Path<(String, String, String, String)>,
) -> Json<Value> {
    state.heartbeat.beat();
    tracing::trace!("💓 Heartbeat from task {}/{}/{}/{}", flow, run, step, task);
    Json(heartbeat_reply())
}

fn heartbeat_reply() -> Value {
    json!({ "wait_time_in_seconds": HEARTBEAT_INTERVAL_SECS })
}
