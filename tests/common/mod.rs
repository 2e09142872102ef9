//! Shared setup for integration tests
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use agentlab::config::ServerConfig;
use agentlab::lifecycle::{Task, TaskLifecycle};
use agentlab::models::{Lab, ProposeTaskRequest};
use agentlab::AppState;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tempfile::TempDir;
use uuid::Uuid;

/// Configuration with fast retries and no providers
pub fn test_config() -> ServerConfig {
    ServerConfig {
        database_url: "sqlite::memory:".to_string(),
        provider_retry_base_ms: 1,
        provider_retry_jitter_ms: 0,
        ..ServerConfig::default()
    }
}

pub async fn setup_state(config: ServerConfig) -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    AppState::new(pool, &config).expect("Failed to build app state")
}

/// State over a file-backed WAL database with several connections, so
/// concurrent calls really contend. Keep the `TempDir` alive for the test.
pub async fn setup_shared_state(config: ServerConfig) -> (Arc<AppState>, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("agentlab.db").display());
    let options = SqliteConnectOptions::from_str(&url)
        .expect("Invalid database URL")
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .expect("Failed to open database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let state = AppState::new(pool, &config).expect("Failed to build app state");
    (state, dir)
}

/// A lab created by a `pi`
pub async fn setup_lab(lifecycle: &TaskLifecycle, slug: &str) -> (Lab, Uuid) {
    let pi = Uuid::new_v4();
    let lab = lifecycle
        .create_lab(pi, slug, "Test Lab")
        .await
        .expect("Failed to create lab");
    (lab, pi)
}

/// Join a fresh agent with the given role
pub async fn add_member(lifecycle: &TaskLifecycle, lab_id: Uuid, role: &str) -> Uuid {
    let agent = Uuid::new_v4();
    lifecycle
        .join_lab(lab_id, agent, role)
        .await
        .expect("Failed to join lab");
    agent
}

pub async fn propose(
    lifecycle: &TaskLifecycle,
    lab_id: Uuid,
    agent: Uuid,
    task_type: &str,
) -> Task {
    lifecycle
        .propose(
            lab_id,
            agent,
            ProposeTaskRequest {
                title: format!("A {} task", task_type),
                description: "Investigate the effect of X on Y".to_string(),
                task_type: task_type.to_string(),
            },
        )
        .await
        .expect("Failed to propose task")
}

/// Drive a task from `proposed` to `voting` as the `pi`
pub async fn task_in_voting(lifecycle: &TaskLifecycle, lab_id: Uuid, pi: Uuid) -> Task {
    let task = propose(lifecycle, lab_id, pi, "analysis").await;
    lifecycle.pick_up(task.id, pi).await.unwrap();
    lifecycle
        .complete(task.id, pi, serde_json::json!({"summary": "done"}))
        .await
        .unwrap();
    lifecycle.start_voting(task.id, pi).await.unwrap()
}

/// Issue a bearer token for a new agent
pub async fn agent_with_token(state: &AppState, token: &str) -> Uuid {
    let agent = Uuid::new_v4();
    state
        .store()
        .insert_agent_token(token, agent)
        .await
        .expect("Failed to insert token");
    agent
}
