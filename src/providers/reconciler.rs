//! Starts upstream jobs and reconciles their state back into the store
//!
//! A job row is created only after the upstream accepted the request, so a
//! failed start never leaves a stuck job behind. Polls are idempotent by
//! job id; a per-job in-flight guard keeps concurrent callers from issuing
//! duplicate upstream requests. No lock is held across a network call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::client::{ProviderClient, UpstreamError};
use super::job::{JobKind, JobStatus, JobView, ProviderJob};
use super::normalize::{extract_external_id, extract_status, normalize_payload, normalize_status};
use super::retry::{retry, RetryError, RetryPolicy};
use crate::error::{AppError, Result};
use crate::lab::Permission;
use crate::lifecycle::{Task, TaskLifecycle, TaskStatus};
use crate::models::StartJobRequest;

fn upstream_failure(err: RetryError<UpstreamError>) -> AppError {
    match err {
        RetryError::Exhausted { attempts, last } => AppError::Exhausted(format!(
            "{} after {} attempts: {}",
            last.code(),
            attempts,
            last
        )),
        RetryError::Aborted(e) => AppError::upstream(e.code(), e.to_string()),
    }
}

/// Removes a job id from the in-flight set when the poll finishes
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    job_id: Uuid,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<Uuid>>>, job_id: Uuid) -> Option<Self> {
        let mut jobs = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.insert(job_id).then(|| Self {
            set: set.clone(),
            job_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut jobs = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.remove(&self.job_id);
    }
}

/// Request body sent to the upstream for a task
pub fn build_start_body(kind: JobKind, task: &Task, request: &StartJobRequest) -> Value {
    let mut body = match kind {
        JobKind::Literature => json!({
            "task_id": task.id,
            "question": request
                .question
                .clone()
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| task.title.clone()),
        }),
        JobKind::Analysis => json!({
            "task_id": task.id,
            "description": if task.description.trim().is_empty() {
                task.title.clone()
            } else {
                task.description.clone()
            },
            "datasets": request.datasets,
        }),
    };
    if let (Some(parameters), Some(obj)) = (&request.parameters, body.as_object_mut()) {
        obj.insert("parameters".to_string(), parameters.clone());
    }
    body
}

pub struct JobReconciler {
    lifecycle: TaskLifecycle,
    literature: Option<ProviderClient>,
    analysis: Option<ProviderClient>,
    policy: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl JobReconciler {
    pub fn new(
        lifecycle: TaskLifecycle,
        literature: Option<ProviderClient>,
        analysis: Option<ProviderClient>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            lifecycle,
            literature,
            analysis,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn client_for(&self, kind: JobKind) -> Result<&ProviderClient> {
        match kind {
            JobKind::Literature => self.literature.as_ref(),
            JobKind::Analysis => self.analysis.as_ref(),
        }
        .ok_or_else(|| {
            AppError::upstream(
                "provider_not_configured",
                format!("No {} provider is configured", kind.as_str()),
            )
        })
    }

    /// Submit a job for an in-progress task. Only the assignee or a `pi`
    /// may start one.
    pub async fn start_job(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        request: StartJobRequest,
    ) -> Result<JobView> {
        let kind: JobKind = request.kind.parse().map_err(AppError::ValidationFailed)?;

        let store = self.lifecycle.store();
        let task = store.get_task(task_id).await?;
        let membership = self.lifecycle.active_membership(task.lab_id, agent_id).await?;
        if !task.is_assigned_to(agent_id) {
            membership.require(Permission::StartJobOverride)?;
        }
        if !kind.serves(task.task_type) {
            return Err(AppError::ValidationFailed(format!(
                "{} jobs cannot back {} tasks",
                kind.as_str(),
                task.task_type.as_str()
            )));
        }
        if task.status != TaskStatus::InProgress {
            return Err(AppError::InvalidState(format!(
                "Jobs can only be started for in-progress tasks (task {} is {})",
                task_id,
                task.status.as_str()
            )));
        }

        let client = self.client_for(kind)?;
        let body = build_start_body(kind, &task, &request);
        let payload = retry(&self.policy, |_| client.start_job(&body))
            .await
            .map_err(upstream_failure)?;

        let external_job_id = extract_external_id(&payload).ok_or_else(|| {
            AppError::upstream(
                "upstream_invalid_response",
                "Upstream accepted the job but returned no job id",
            )
        })?;
        let status = match extract_status(&payload).as_deref().map(normalize_status) {
            Some(JobStatus::Running) => JobStatus::Running,
            _ => JobStatus::Pending,
        };

        let now = Utc::now();
        let job = ProviderJob {
            id: Uuid::new_v4(),
            task_id,
            kind,
            external_job_id: Some(external_job_id),
            status,
            normalized_result: None,
            raw_result: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        store.create_job(&job).await?;

        tracing::info!(
            "Started {} job {} (upstream {:?}) for task {}",
            kind.as_str(),
            job.id,
            job.external_job_id,
            task_id
        );
        self.lifecycle.notify_job_update(&job).await?;
        Ok(job.into())
    }

    /// Read a job without contacting the upstream
    pub async fn get_job(&self, job_id: Uuid, agent_id: Uuid) -> Result<JobView> {
        let job = self.lifecycle.store().get_job(job_id).await?;
        self.authorize_read(&job, agent_id).await?;
        Ok(job.into())
    }

    pub async fn list_jobs(&self, task_id: Uuid, agent_id: Uuid) -> Result<Vec<JobView>> {
        let store = self.lifecycle.store();
        let task = store.get_task(task_id).await?;
        self.lifecycle.active_membership(task.lab_id, agent_id).await?;
        let jobs = store.list_jobs_for_task(task_id).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    /// Fetch upstream status for a non-terminal job and store the
    /// normalized result. Terminal jobs are returned as stored.
    pub async fn poll_job(&self, job_id: Uuid, agent_id: Uuid) -> Result<JobView> {
        let store = self.lifecycle.store();
        let job = store.get_job(job_id).await?;
        self.authorize_read(&job, agent_id).await?;

        let Some(external_id) = job.external_job_id.clone() else {
            return Ok(job.into());
        };
        if job.status.is_terminal() {
            tracing::debug!("Job {} is {}, not polling", job_id, job.status.as_str());
            return Ok(job.into());
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, job_id) else {
            tracing::debug!("Poll for job {} already in flight", job_id);
            return Ok(job.into());
        };

        let client = self.client_for(job.kind)?;
        let payload = retry(&self.policy, |_| client.get_job(&external_id))
            .await
            .map_err(upstream_failure)?;

        let normalized = normalize_payload(job.kind, &payload);
        let (job, changed) = store.update_job_poll(job_id, &normalized, &payload).await?;

        if changed {
            tracing::info!("Job {} reconciled as {}", job_id, job.status.as_str());
            self.lifecycle.notify_job_update(&job).await?;
        }
        Ok(job.into())
    }

    async fn authorize_read(&self, job: &ProviderJob, agent_id: Uuid) -> Result<()> {
        let task = self.lifecycle.store().get_task(job.task_id).await?;
        self.lifecycle
            .active_membership(task.lab_id, agent_id)
            .await
            .map(|_| ())
    }
}
