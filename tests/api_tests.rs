//! API integration tests

mod common;

use axum::body::Body;
use axum::Router;
use common::{agent_with_token, setup_state, test_config};
use hyper::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn setup_app() -> (Router, std::sync::Arc<agentlab::AppState>) {
    let state = setup_state(test_config()).await;
    (agentlab::api::router(state.clone()), state)
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = setup_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (app, _state) = setup_app().await;

    let (status, body) = send(&app, "POST", "/labs", None, Some(json!({"slug": "x", "name": "X"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    assert!(body["detail"].is_string());

    let (status, body) = send(&app, "GET", "/health", Some("nope"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));

    let (status, body) = send(&app, "POST", "/labs", Some("unknown"), Some(json!({"slug": "x", "name": "X"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_task_flow_over_http() {
    let (app, state) = setup_app().await;
    agent_with_token(&state, "pi-token").await;
    agent_with_token(&state, "scout-token").await;
    let pi = Some("pi-token");
    let scout = Some("scout-token");

    let (status, lab) = send(&app, "POST", "/labs", pi, Some(json!({"slug": "optics", "name": "Optics"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let lab_id = lab["id"].as_str().unwrap().to_string();

    let (status, member) = send(&app, "POST", &format!("/labs/{}/members", lab_id), scout, Some(json!({"role": "scout"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(member["role"], "scout");

    let (status, task) = send(
        &app,
        "POST",
        &format!("/labs/{}/tasks", lab_id),
        pi,
        Some(json!({"title": "Survey lens coatings", "task_type": "literature_review"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["status"], "proposed");
    let task_id = task["id"].as_str().unwrap().to_string();

    let (status, task) = send(&app, "POST", &format!("/tasks/{}/pick-up", task_id), scout, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "in_progress");

    let (status, body) = send(&app, "POST", &format!("/tasks/{}/pick-up", task_id), pi, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, task) = send(
        &app,
        "POST",
        &format!("/tasks/{}/complete", task_id),
        scout,
        Some(json!({"result": {
            "summary": "Anti-reflective coatings reduce loss",
            "papers": [{"title": "Coatings", "doi": "10.1/c"}]
        }})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "completed");
    assert!(task["verification_score"].is_number());
    assert!(task["badge"].is_string());

    let (status, body) = send(&app, "POST", &format!("/tasks/{}/start-voting", task_id), scout, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, task) = send(&app, "POST", &format!("/tasks/{}/start-voting", task_id), pi, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "voting");

    let (status, receipt) = send(&app, "POST", &format!("/tasks/{}/votes", task_id), scout, Some(json!({"vote": "approve"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["vote"]["vote"], "approve");
    assert_eq!(receipt["resolved"], false);

    let (_, receipt) = send(&app, "POST", &format!("/tasks/{}/votes", task_id), pi, Some(json!({"vote": "approve", "reasoning": "Good"}))).await;
    assert_eq!(receipt["resolved"], true);
    assert_eq!(receipt["summary"]["status"], "accepted");

    let (status, listing) = send(&app, "GET", &format!("/tasks/{}/votes", task_id), scout, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["votes"].as_array().unwrap().len(), 2);
    assert_eq!(listing["summary"]["quorum"], 2);

    let (status, body) = send(&app, "POST", &format!("/tasks/{}/votes", task_id), scout, Some(json!({"vote": "reject"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_invalid_input_is_validation_failed() {
    let (app, state) = setup_app().await;
    agent_with_token(&state, "pi-token").await;
    let pi = Some("pi-token");

    let (status, body) = send(&app, "POST", "/labs", pi, Some(json!({"slug": "Bad Slug", "name": "X"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");

    let (status, body) = send(&app, "POST", "/labs", pi, Some(json!({"name": "no slug"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");

    let (_, lab) = send(&app, "POST", "/labs", pi, Some(json!({"slug": "ok", "name": "Ok"}))).await;
    let lab_id = lab["id"].as_str().unwrap();
    let (status, body) = send(
        &app,
        "POST",
        &format!("/labs/{}/tasks", lab_id),
        pi,
        Some(json!({"title": "T", "task_type": "poetry"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (app, state) = setup_app().await;
    agent_with_token(&state, "token").await;

    let (status, body) = send(&app, "GET", &format!("/tasks/{}", uuid::Uuid::new_v4()), Some("token"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_artifact_listing_is_paginated() {
    let (app, state) = setup_app().await;
    agent_with_token(&state, "pi-token").await;
    let pi = Some("pi-token");

    let (_, lab) = send(&app, "POST", "/labs", pi, Some(json!({"slug": "arts", "name": "Arts"}))).await;
    let lab_id = lab["id"].as_str().unwrap();
    let (_, task) = send(
        &app,
        "POST",
        &format!("/labs/{}/tasks", lab_id),
        pi,
        Some(json!({"title": "Fit model", "task_type": "analysis"})),
    )
    .await;
    let task_id = task["id"].as_str().unwrap();
    send(&app, "POST", &format!("/tasks/{}/pick-up", task_id), pi, None).await;
    send(
        &app,
        "POST",
        &format!("/tasks/{}/complete", task_id),
        pi,
        Some(json!({"result": {
            "summary": "Fit converged",
            "artifacts": [
                {"name": "fit.csv", "path": "s3://b/fit.csv", "type": "csv"},
                {"name": "fit.png", "url": "https://cdn/fit.png"},
                "s3://b/notes.md"
            ]
        }})),
    )
    .await;

    let (status, page) = send(&app, "GET", &format!("/tasks/{}/artifacts?page=1&per_page=2", task_id), pi, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["page"], 1);
    assert_eq!(page["per_page"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["items"][0]["source"], "task_result");

    agent_with_token(&state, "outsider-token").await;
    let (status, body) = send(&app, "GET", &format!("/tasks/{}/artifacts", task_id), Some("outsider-token"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}
