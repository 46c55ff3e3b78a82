//! End-to-end job lifecycle over the HTTP API.
//!
//! Drives the full router with `oneshot` requests: create, poll status,
//! fetch the result, and the admission and conflict paths around them.
//! Workflows run with no step delay so jobs finish in milliseconds.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use crewdeck_server::{create_app, AppState, Config};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state(max_jobs: usize) -> Arc<AppState> {
    AppState::new(Config {
        step_delay: Duration::ZERO,
        max_concurrent_jobs: max_jobs,
        ..Config::default()
    })
    .expect("default workflows")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

/// Poll `/status` until the job leaves pending/running.
async fn wait_terminal(app: &Router, id: &str) -> Value {
    for _ in 0..200 {
        let (status, job) = get(app, &format!("/api/jobs/{id}/status")).await;
        assert_eq!(status, StatusCode::OK);
        if job["status"] == "completed" || job["status"] == "error" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn space_travel_job_runs_to_completion() {
    let app = create_app(test_state(25));

    let (status, created) = post(&app, "/api/jobs", json!({"topic": "space travel"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["kind"], "content");
    let id = created["id"].as_str().unwrap().to_string();

    let job = wait_terminal(&app, &id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["input"], json!({"topic": "space travel"}));
    let log: Vec<&str> = job["log"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l.as_str().unwrap())
        .collect();
    assert!(log
        .iter()
        .any(|l| l.contains("Research Agent: gathering information on 'space travel'")));
    assert_eq!(log.last(), Some(&"Job completed"));

    let (status, result) = get(&app, &format!("/api/jobs/{id}/result")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["result"]["topic"], "space travel");
    assert!(result["result"]["content"]
        .as_str()
        .unwrap()
        .starts_with("# space travel: A Comprehensive Overview"));
    assert!(result.get("error").is_none());
}

#[tokio::test]
async fn agent_job_uses_explicit_kind() {
    let app = create_app(test_state(25));

    let (status, created) = post(
        &app,
        "/api/jobs",
        json!({"kind": "agent", "input": {"prompt": "Summarize the launch plan"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["kind"], "agent");

    let id = created["id"].as_str().unwrap().to_string();
    wait_terminal(&app, &id).await;
    let (_, result) = get(&app, &format!("/api/jobs/{id}/result")).await;
    assert!(result["result"]
        .as_str()
        .unwrap()
        .starts_with("# Agent Run Result"));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_admission() {
    let state = test_state(25);
    let app = create_app(Arc::clone(&state));

    let (status, body) = post(&app, "/api/jobs", json!({"topic": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad request");

    let (status, _) = post(&app, "/api/jobs", json!({"kind": "poetry", "topic": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.store.is_empty());
}

#[tokio::test]
async fn capacity_limit_returns_429() {
    let app = create_app(test_state(2));

    for topic in ["one", "two"] {
        let (status, _) = post(&app, "/api/jobs", json!({"defer": true, "topic": topic})).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = post(&app, "/api/jobs", json!({"topic": "three"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many active jobs");

    let (_, health) = get(&app, "/api/health").await;
    assert_eq!(health["active_jobs"], 2);
    assert_eq!(health["max_jobs"], 2);
}

#[tokio::test]
async fn deferred_job_runs_once() {
    let app = create_app(test_state(25));

    let (_, created) = post(&app, "/api/jobs", json!({"defer": true, "topic": "rovers"})).await;
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = get(&app, &format!("/api/jobs/{id}/result")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Job not finished");

    let (_, pending) = get(&app, "/api/jobs?status=pending").await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let run_uri = format!("/api/jobs/{id}/run");
    let (status, started) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(&run_uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "running");

    let (status, _) = post(&app, &run_uri, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let job = wait_terminal(&app, &id).await;
    assert_eq!(job["status"], "completed");
}

#[tokio::test]
async fn run_can_override_input() {
    let app = create_app(test_state(25));

    let (_, created) = post(&app, "/api/jobs", json!({"defer": true, "topic": "old"})).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = post(
        &app,
        &format!("/api/jobs/{id}/run"),
        json!({"input": {"topic": "new"}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let job = wait_terminal(&app, &id).await;
    assert_eq!(job["input"]["topic"], "new");
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_404() {
    let app = create_app(test_state(25));

    let missing = uuid::Uuid::new_v4();
    for uri in [
        format!("/api/jobs/{missing}/status"),
        format!("/api/jobs/{missing}/result"),
        "/api/jobs/not-a-uuid/status".to_string(),
    ] {
        let (status, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"], "Job not found");
    }

    let (status, _) = post(&app, &format!("/api/jobs/{missing}/run"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_rejects_unknown_status_filter() {
    let app = create_app(test_state(25));
    let (status, _) = get(&app, "/api/jobs?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, jobs) = get(&app, "/api/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs, json!([]));
}

#[tokio::test]
async fn malformed_body_gets_json_400() {
    let state = test_state(25);
    let app = create_app(Arc::clone(&state));

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{topic: space travel}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad request");
    assert!(body["details"].as_str().unwrap().starts_with("Invalid JSON body"));
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn body_without_content_type_is_still_parsed() {
    let app = create_app(test_state(25));

    let (status, created) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .body(Body::from(r#"{"topic": "space travel"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad request");
}

#[tokio::test]
async fn creation_is_refused_once_shutdown_begins() {
    let state = test_state(25);
    let app = create_app(Arc::clone(&state));

    let (status, deferred) = post(
        &app,
        "/api/jobs",
        json!({"kind": "content", "defer": true, "input": {"topic": "t"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = deferred["id"].as_str().unwrap().to_string();

    state.runner.shutdown(Duration::from_millis(50)).await;

    let (status, body) = post(&app, "/api/jobs", json!({"topic": "space travel"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Service unavailable");
    assert_eq!(state.store.len(), 1);

    let (status, _) = post(&app, &format!("/api/jobs/{id}/run"), json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (_, job) = get(&app, &format!("/api/jobs/{id}/status")).await;
    assert_eq!(job["status"], "pending");
}
