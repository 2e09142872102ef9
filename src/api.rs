//! HTTP routes
//!
//! Every route except `/health` requires a bearer token. Transitions are
//! keyed by task id and return the updated task projection.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::artifacts::{self, ArtifactPage};
use crate::auth::AuthAgent;
use crate::error::{AppError, Result};
use crate::lab::Membership;
use crate::lifecycle::Task;
use crate::models::{
    CompleteTaskRequest, CreateLabRequest, Critique, CritiqueRequest, JoinLabRequest, Lab,
    PageQuery, ProposeTaskRequest, StartJobRequest, TaskListQuery, VoteRequest,
};
use crate::providers::JobView;
use crate::scoring::Badge;
use crate::voting::{VoteListing, VoteReceipt};
use crate::websocket;
use crate::AppState;

/// JSON body whose rejections use the application error shape
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::ValidationFailed(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// Task projection with its badge
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<Badge>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let badge = task.badge();
        Self { task, badge }
    }
}

#[derive(Debug, Serialize)]
pub struct CritiqueReceipt {
    pub task: TaskView,
    pub critique: Critique,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/labs", post(create_lab))
        .route("/labs/:lab_id/members", get(list_members).post(join_lab))
        .route("/labs/:lab_id/leave", post(leave_lab))
        .route("/labs/:lab_id/tasks", get(list_tasks).post(propose_task))
        .route("/labs/:lab_id/events", get(websocket::handler))
        .route("/tasks/:task_id", get(get_task))
        .route("/tasks/:task_id/pick-up", post(pick_up))
        .route("/tasks/:task_id/complete", post(complete))
        .route("/tasks/:task_id/critiques", get(list_critiques).post(critique))
        .route("/tasks/:task_id/start-voting", post(start_voting))
        .route("/tasks/:task_id/votes", get(list_votes).post(vote))
        .route("/tasks/:task_id/supersede", post(supersede))
        .route("/tasks/:task_id/jobs", get(list_jobs).post(start_job))
        .route("/tasks/:task_id/artifacts", get(list_artifacts))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/poll", post(poll_job))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// Labs

async fn create_lab(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    ApiJson(req): ApiJson<CreateLabRequest>,
) -> Result<impl IntoResponse> {
    let lab: Lab = state
        .lifecycle
        .create_lab(agent_id, &req.slug, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(lab)))
}

async fn join_lab(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(lab_id): Path<Uuid>,
    ApiJson(req): ApiJson<JoinLabRequest>,
) -> Result<Json<Membership>> {
    let membership = state.lifecycle.join_lab(lab_id, agent_id, &req.role).await?;
    Ok(Json(membership))
}

async fn leave_lab(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(lab_id): Path<Uuid>,
) -> Result<Json<Membership>> {
    Ok(Json(state.lifecycle.leave_lab(lab_id, agent_id).await?))
}

async fn list_members(
    State(state): State<Arc<AppState>>,
    _agent: AuthAgent,
    Path(lab_id): Path<Uuid>,
) -> Result<Json<Vec<Membership>>> {
    Ok(Json(state.lifecycle.list_members(lab_id).await?))
}

// Tasks

async fn propose_task(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(lab_id): Path<Uuid>,
    ApiJson(req): ApiJson<ProposeTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.lifecycle.propose(lab_id, agent_id, req).await?;
    Ok((StatusCode::CREATED, Json(TaskView::from(task))))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    _agent: AuthAgent,
    Path(lab_id): Path<Uuid>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskView>>> {
    let tasks = state
        .lifecycle
        .list_tasks(lab_id, query.status.as_deref())
        .await?;
    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    _agent: AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskView>> {
    Ok(Json(state.lifecycle.get_task(task_id).await?.into()))
}

async fn pick_up(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskView>> {
    Ok(Json(state.lifecycle.pick_up(task_id, agent_id).await?.into()))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
    ApiJson(req): ApiJson<CompleteTaskRequest>,
) -> Result<Json<TaskView>> {
    let task = state
        .lifecycle
        .complete(task_id, agent_id, req.result)
        .await?;
    Ok(Json(task.into()))
}

async fn critique(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
    ApiJson(req): ApiJson<CritiqueRequest>,
) -> Result<impl IntoResponse> {
    let (task, critique) = state.lifecycle.critique(task_id, agent_id, req).await?;
    let receipt = CritiqueReceipt {
        task: task.into(),
        critique,
    };
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn list_critiques(
    State(state): State<Arc<AppState>>,
    _agent: AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<Critique>>> {
    Ok(Json(state.lifecycle.list_critiques(task_id).await?))
}

async fn start_voting(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskView>> {
    Ok(Json(
        state.lifecycle.start_voting(task_id, agent_id).await?.into(),
    ))
}

async fn vote(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
    ApiJson(req): ApiJson<VoteRequest>,
) -> Result<Json<VoteReceipt>> {
    let receipt = state
        .lifecycle
        .vote(task_id, agent_id, &req.vote, req.reasoning.as_deref())
        .await?;
    Ok(Json(receipt))
}

async fn list_votes(
    State(state): State<Arc<AppState>>,
    _agent: AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<VoteListing>> {
    Ok(Json(state.lifecycle.list_votes(task_id).await?))
}

async fn supersede(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskView>> {
    Ok(Json(state.lifecycle.supersede(task_id, agent_id).await?.into()))
}

// Provider jobs and artifacts

async fn start_job(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
    ApiJson(req): ApiJson<StartJobRequest>,
) -> Result<impl IntoResponse> {
    let job = state.reconciler.start_job(task_id, agent_id, req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<JobView>>> {
    Ok(Json(state.reconciler.list_jobs(task_id, agent_id).await?))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>> {
    Ok(Json(state.reconciler.get_job(job_id, agent_id).await?))
}

async fn poll_job(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>> {
    Ok(Json(state.reconciler.poll_job(job_id, agent_id).await?))
}

async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(task_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ArtifactPage>> {
    Ok(Json(
        artifacts::list_for_task(&state.lifecycle, task_id, agent_id, query).await?,
    ))
}
