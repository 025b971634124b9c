use localmeta::{config::Config, create_app, runtime::Heartbeat};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct TestApp {
    _dir: TempDir,
    base: String,
    heartbeat: Arc<Heartbeat>,
    client: Client,
}

impl TestApp {
    async fn spawn() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.root_path = dir.path().to_path_buf();
        let heartbeat = Arc::new(Heartbeat::new());
        let app = create_app(&config, Arc::clone(&heartbeat)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _dir: dir,
            base: format!("http://{}", addr),
            heartbeat,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn new_run(&self, flow: &str) -> String {
        let (status, run) = self.post(&format!("/flows/{}/run", flow), json!({})).await;
        assert_eq!(status, StatusCode::CREATED);
        run["run_number"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn ping_reports_version() {
    let app = TestApp::spawn().await;
    let response = app.client.get(app.url("/ping")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("metadata_service_version").unwrap(),
        "2.5.0"
    );
    assert_eq!(response.text().await.unwrap(), "pong");
}

#[tokio::test]
async fn flow_run_step_task_artifact_walkthrough() {
    let app = TestApp::spawn().await;

    let (status, flow) = app.post("/flows/F", json!({"user_name": "alice"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(flow["flow_id"], "F");
    assert_eq!(flow["user_name"], "alice");

    let (status, existing) = app.post("/flows/F", json!({"user_name": "bob"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(existing["user_name"], "alice");

    let run = app.new_run("F").await;
    let run_path = format!("/flows/F/runs/{}", run);

    let (status, step) = app.post(&format!("{}/steps/start/step", run_path), json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(step["step_name"], "start");
    let (status, _) = app.post(&format!("{}/steps/start/step", run_path), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, first) = app.post(&format!("{}/steps/start/task", run_path), json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["task_id"], "1");
    let (_, second) = app.post(&format!("{}/steps/start/task", run_path), json!({})).await;
    assert_eq!(second["task_id"], "2");

    let task_path = format!("{}/steps/start/tasks/1", run_path);
    let (status, body) = app
        .post(
            &format!("{}/artifact", task_path),
            json!({"name": "x", "attempt_id": 0, "sha": "abc", "type": "metaflow.artifact"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, artifacts) = app.get(&format!("{}/artifacts", task_path)).await;
    assert_eq!(status, StatusCode::OK);
    let artifacts = artifacts.as_array().unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0]["name"], "x");
    assert_eq!(artifacts[0]["sha"], "abc");

    let (_, attempt0) = app.get(&format!("{}/attempt/0/artifacts", task_path)).await;
    assert_eq!(attempt0.as_array().unwrap().len(), 1);
    let (_, attempt1) = app.get(&format!("{}/artifacts?attempt=1", task_path)).await;
    assert!(attempt1.as_array().unwrap().is_empty());

    let (_, steps) = app.get(&format!("{}/steps", run_path)).await;
    assert_eq!(steps.as_array().unwrap().len(), 1);
    let (_, tasks) = app.get(&format!("{}/steps/start/tasks", run_path)).await;
    assert_eq!(tasks.as_array().unwrap().len(), 2);
    let (status, task) = app.get(&task_path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["run_number"], run.as_str());
}

#[tokio::test]
async fn missing_objects_are_not_found() {
    let app = TestApp::spawn().await;
    assert_eq!(app.get("/flows/nope").await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/flows/nope/runs/1").await.0, StatusCode::NOT_FOUND);
    assert_eq!(
        app.get("/flows/nope/runs/1/steps/start/tasks/1").await.0,
        StatusCode::NOT_FOUND
    );
    let (status, runs) = app.get("/flows/nope/runs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs, json!([]));
}

#[tokio::test]
async fn reserved_names_are_rejected() {
    let app = TestApp::spawn().await;
    let (status, _) = app.post("/flows/_meta", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn parameters_step_and_task_are_accepted() {
    let app = TestApp::spawn().await;
    let run = app.new_run("F").await;
    let run_path = format!("/flows/F/runs/{}", run);

    let (status, step) = app
        .post(&format!("{}/steps/_parameters/step", run_path), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(step["step_name"], "_parameters");

    let (status, task) = app
        .post(&format!("{}/steps/_parameters/task", run_path), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["task_id"], "1");
    let (_, task) = app.post(&format!("{}/steps/start/task", run_path), json!({})).await;
    assert_eq!(task["task_id"], "2");

    let (_, steps) = app.get(&format!("{}/steps", run_path)).await;
    assert_eq!(steps.as_array().unwrap().len(), 2);
    let (status, _) = app
        .get(&format!("{}/steps/_parameters/tasks/1", run_path))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn artifacts_keep_their_first_registration() {
    let app = TestApp::spawn().await;
    let run = app.new_run("F").await;
    let task_path = format!("/flows/F/runs/{}/steps/start/tasks/1", run);
    app.post(&format!("/flows/F/runs/{}/steps/start/task", run), json!({})).await;

    for sha in ["first", "second"] {
        let (status, _) = app
            .post(
                &format!("{}/artifact", task_path),
                json!({"name": "x", "attempt_id": 0, "sha": sha}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, artifacts) = app.get(&format!("{}/attempt/0/artifacts", task_path)).await;
    assert_eq!(artifacts, json!([{"name": "x", "attempt_id": 0, "sha": "first"}]));
}

#[tokio::test]
async fn empty_and_malformed_create_bodies_are_accepted() {
    let app = TestApp::spawn().await;
    let response = app.client.post(app.url("/flows/F")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .client
        .post(app.url("/flows/F/run"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn run_ids_increase() {
    let app = TestApp::spawn().await;
    let mut previous = 0u64;
    for _ in 0..20 {
        let run: u64 = app.new_run("F").await.parse().unwrap();
        assert!(run > previous);
        previous = run;
    }
}

#[tokio::test]
async fn tag_mutation() {
    let app = TestApp::spawn().await;
    let (_, run) = app.post("/flows/F/run", json!({"tags": ["zeta", "beta"]})).await;
    let run = run["run_number"].as_str().unwrap().to_string();
    let path = format!("/flows/F/runs/{}/tag/mutate", run);

    let response = app
        .client
        .patch(app.url(&path))
        .json(&json!({"tags_to_add": ["alpha", "beta"], "tags_to_remove": ["zeta"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"tags": ["alpha", "beta"]}));

    let (_, stored) = app.get(&format!("/flows/F/runs/{}", run)).await;
    assert_eq!(stored["tags"], json!(["beta", "alpha"]));

    let missing = app
        .client
        .patch(app.url("/flows/F/runs/999/tag/mutate"))
        .json(&json!({"tags_to_add": ["a"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = app
        .client
        .patch(app.url(&path))
        .body("[1, 2")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn metadata_and_filtered_tasks() {
    let app = TestApp::spawn().await;
    let run = app.new_run("F").await;
    let step_path = format!("/flows/F/runs/{}/steps/train", run);
    for _ in 0..3 {
        app.post(&format!("{}/task", step_path), json!({})).await;
    }

    let (status, _) = app
        .post(
            &format!("{}/tasks/1/metadata", step_path),
            json!([
                {"field_name": "attempt_ok", "value": "True", "type": "attempt_ok"},
                {"field_name": "origin", "value": "laptop"}
            ]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    app.post(
        &format!("{}/tasks/2/metadata", step_path),
        json!({"field_name": "attempt_ok", "value": "False"}),
    )
    .await;
    app.post(
        &format!("{}/tasks/3/metadata", step_path),
        json!({"field_name": "attempt_ok", "value": "True"}),
    )
    .await;

    let (_, entries) = app.get(&format!("{}/tasks/1/metadata", step_path)).await;
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e["type"] == "attempt_ok"));

    let (status, matched) = app
        .get(&format!(
            "{}/filtered_tasks?metadata_field_name=attempt_ok&pattern=^True$",
            step_path
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        matched,
        json!([
            format!("F/{}/train/1", run),
            format!("F/{}/train/3", run)
        ])
    );

    let (_, all) = app
        .get(&format!("{}/filtered_tasks?metadata_field_name=attempt_ok", step_path))
        .await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (status, unnamed) = app
        .get(&format!("{}/filtered_tasks?pattern=True", step_path))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unnamed, json!([]));
    let (status, _) = app
        .get(&format!(
            "{}/filtered_tasks?metadata_field_name=attempt_ok&pattern=(",
            step_path
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn heartbeats_reset_idle_time() {
    let app = TestApp::spawn().await;
    let run = app.new_run("F").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(app.heartbeat.idle_for() >= Duration::from_millis(200));

    let (status, body) = app
        .post(&format!("/flows/F/runs/{}/heartbeat", run), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"wait_time_in_seconds": 10}));
    assert!(app.heartbeat.idle_for() < Duration::from_millis(200));

    let (status, _) = app
        .post(
            &format!("/flows/F/runs/{}/steps/start/tasks/1/heartbeat", run),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}
