//! Task lifecycle service
//!
//! Every agent-requested transition passes through here:
//! - membership and role checks
//! - the transition itself, applied by the store as a conditional update
//! - side effects (scoring on completion, tally on vote)
//! - event broadcasting

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::task::{Task, TaskStatus, TaskType};
use crate::error::{AppError, Result};
use crate::lab::{Membership, Permission, Role};
use crate::models::{Critique, CritiqueRequest, Lab, ProposeTaskRequest};
use crate::providers::{JobKind, JobStatus, ProviderJob};
use crate::scoring::{Badge, TaskMetadata, VerificationEngine};
use crate::store::Store;
use crate::voting::{VoteListing, VoteReceipt, VoteValue};

/// Events emitted by the lifecycle, scoped to a lab
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// An agent joined the lab or changed role
    MemberJoined {
        lab_id: Uuid,
        agent_id: Uuid,
        role: Role,
    },
    /// An agent left the lab
    MemberLeft {
        lab_id: Uuid,
        agent_id: Uuid,
    },
    /// A task was proposed
    TaskProposed {
        lab_id: Uuid,
        task_id: Uuid,
        task_type: TaskType,
        proposed_by: Uuid,
    },
    /// A task was assigned to the agent that picked it up
    TaskPickedUp {
        lab_id: Uuid,
        task_id: Uuid,
        agent_id: Uuid,
    },
    /// A task was completed and scored
    TaskCompleted {
        lab_id: Uuid,
        task_id: Uuid,
        agent_id: Uuid,
        score: f64,
        badge: Badge,
    },
    /// A critique was recorded against a task
    CritiqueSubmitted {
        lab_id: Uuid,
        task_id: Uuid,
        critique_id: Uuid,
        author_id: Uuid,
        status: TaskStatus,
    },
    /// A pi opened voting on a task
    VotingStarted {
        lab_id: Uuid,
        task_id: Uuid,
    },
    /// An agent cast or replaced their vote
    VoteCast {
        lab_id: Uuid,
        task_id: Uuid,
        agent_id: Uuid,
        vote: VoteValue,
    },
    /// Voting reached quorum and closed
    TaskResolved {
        lab_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
        approve: usize,
        reject: usize,
    },
    /// A task was withdrawn by a pi
    TaskSuperseded {
        lab_id: Uuid,
        task_id: Uuid,
        superseded_by: Uuid,
    },
    /// A provider job was started or reconciled
    ProviderJobUpdated {
        lab_id: Uuid,
        task_id: Uuid,
        job_id: Uuid,
        kind: JobKind,
        status: JobStatus,
    },
}

impl TaskEvent {
    pub fn lab_id(&self) -> Uuid {
        match self {
            TaskEvent::MemberJoined { lab_id, .. }
            | TaskEvent::MemberLeft { lab_id, .. }
            | TaskEvent::TaskProposed { lab_id, .. }
            | TaskEvent::TaskPickedUp { lab_id, .. }
            | TaskEvent::TaskCompleted { lab_id, .. }
            | TaskEvent::CritiqueSubmitted { lab_id, .. }
            | TaskEvent::VotingStarted { lab_id, .. }
            | TaskEvent::VoteCast { lab_id, .. }
            | TaskEvent::TaskResolved { lab_id, .. }
            | TaskEvent::TaskSuperseded { lab_id, .. }
            | TaskEvent::ProviderJobUpdated { lab_id, .. } => *lab_id,
        }
    }
}

/// Lab slugs are short lowercase identifiers
fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug.len() <= 64
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::ValidationFailed(format!(
            "Invalid lab slug '{}': use 1-64 lowercase letters, digits or dashes",
            slug
        )))
    }
}

/// Coordinates task transitions for all labs
#[derive(Clone)]
pub struct TaskLifecycle {
    store: Store,
    engine: Arc<VerificationEngine>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl TaskLifecycle {
    pub fn new(store: Store, engine: Arc<VerificationEngine>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            engine,
            event_tx,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn engine(&self) -> &VerificationEngine {
        &self.engine
    }

    /// Subscribe to lifecycle events across all labs
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    /// The caller's membership, which must be active
    pub async fn active_membership(&self, lab_id: Uuid, agent_id: Uuid) -> Result<Membership> {
        match self.store.get_membership(lab_id, agent_id).await? {
            Some(m) if m.is_active() => Ok(m),
            _ => Err(AppError::Forbidden(format!(
                "Agent {} is not an active member of lab {}",
                agent_id, lab_id
            ))),
        }
    }

    // Labs

    pub async fn create_lab(&self, agent_id: Uuid, slug: &str, name: &str) -> Result<Lab> {
        validate_slug(slug)?;
        if name.trim().is_empty() {
            return Err(AppError::ValidationFailed("Lab name is required".to_string()));
        }

        let lab = self.store.create_lab(slug, name.trim(), agent_id).await?;
        tracing::info!("Lab {} ({}) created by {}", lab.slug, lab.id, agent_id);
        self.emit(TaskEvent::MemberJoined {
            lab_id: lab.id,
            agent_id,
            role: Role::Pi,
        });
        Ok(lab)
    }

    pub async fn join_lab(&self, lab_id: Uuid, agent_id: Uuid, role: &str) -> Result<Membership> {
        let role: Role = role.parse().map_err(AppError::ValidationFailed)?;
        let membership = self.store.join_lab(lab_id, agent_id, role).await?;
        tracing::info!("Agent {} joined lab {} as {}", agent_id, lab_id, role.as_str());
        self.emit(TaskEvent::MemberJoined {
            lab_id,
            agent_id,
            role,
        });
        Ok(membership)
    }

    pub async fn leave_lab(&self, lab_id: Uuid, agent_id: Uuid) -> Result<Membership> {
        let membership = self.store.leave_lab(lab_id, agent_id).await?;
        tracing::info!("Agent {} left lab {}", agent_id, lab_id);
        self.emit(TaskEvent::MemberLeft { lab_id, agent_id });
        Ok(membership)
    }

    pub async fn list_members(&self, lab_id: Uuid) -> Result<Vec<Membership>> {
        self.store.get_lab(lab_id).await?;
        self.store.list_active_members(lab_id).await
    }

    // Task transitions

    /// Any active member may propose
    pub async fn propose(
        &self,
        lab_id: Uuid,
        agent_id: Uuid,
        request: ProposeTaskRequest,
    ) -> Result<Task> {
        self.store.get_lab(lab_id).await?;
        self.active_membership(lab_id, agent_id)
            .await?
            .require(Permission::Propose)?;

        let task_type: TaskType = request
            .task_type
            .parse()
            .map_err(AppError::ValidationFailed)?;
        if request.title.trim().is_empty() {
            return Err(AppError::ValidationFailed("Task title is required".to_string()));
        }

        let task = Task::new(
            lab_id,
            agent_id,
            request.title.trim(),
            request.description,
            task_type,
        );
        self.store.create_task(&task).await?;

        tracing::info!(
            "Task {} ({}) proposed in lab {} by {}",
            task.id,
            task_type.as_str(),
            lab_id,
            agent_id
        );
        self.emit(TaskEvent::TaskProposed {
            lab_id,
            task_id: task.id,
            task_type,
            proposed_by: agent_id,
        });
        Ok(task)
    }

    /// `proposed -> in_progress`, gated on role. A `pi` may pick up any type.
    pub async fn pick_up(&self, task_id: Uuid, agent_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        let membership = self.active_membership(task.lab_id, agent_id).await?;

        if !membership.role.can_pick_up(task.task_type) {
            return Err(AppError::Forbidden(format!(
                "Role {} cannot pick up {} tasks",
                membership.role.as_str(),
                task.task_type.as_str()
            )));
        }

        let was_assigned = task.is_assigned_to(agent_id);
        let task = self.store.assign_task(task_id, agent_id).await?;

        if !was_assigned {
            tracing::info!("Task {} picked up by {}", task_id, agent_id);
            self.emit(TaskEvent::TaskPickedUp {
                lab_id: task.lab_id,
                task_id,
                agent_id,
            });
        }
        Ok(task)
    }

    /// `in_progress -> completed`. The result is scored before it is
    /// stored; scoring degrades to a low score and never fails the call.
    pub async fn complete(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Task> {
        if !result.is_object() {
            return Err(AppError::ValidationFailed(
                "Task result must be a JSON object".to_string(),
            ));
        }

        let task = self.store.get_task(task_id).await?;
        let membership = self.active_membership(task.lab_id, agent_id).await?;
        task.status.ensure_transition(TaskStatus::Completed)?;
        if !task.is_assigned_to(agent_id) {
            membership.require(Permission::CompleteOverride)?;
        }

        let verification = self.engine.verify(&result, &TaskMetadata::from(&task));
        let breakdown = serde_json::to_value(&verification)
            .map_err(|e| AppError::Internal(format!("Failed to encode verification: {}", e)))?;

        let task = self
            .store
            .complete_task(task_id, &result, verification.score, &breakdown)
            .await?;

        tracing::info!(
            "Task {} completed by {} with score {} ({})",
            task_id,
            agent_id,
            verification.score,
            verification.badge.as_str()
        );
        self.emit(TaskEvent::TaskCompleted {
            lab_id: task.lab_id,
            task_id,
            agent_id,
            score: verification.score,
            badge: verification.badge,
        });
        Ok(task)
    }

    /// File a critique. The first critique on a completed task opens the
    /// critique period.
    pub async fn critique(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        request: CritiqueRequest,
    ) -> Result<(Task, Critique)> {
        if request.content.trim().is_empty() {
            return Err(AppError::ValidationFailed(
                "Critique content is required".to_string(),
            ));
        }

        let task = self.store.get_task(task_id).await?;
        self.active_membership(task.lab_id, agent_id)
            .await?
            .require(Permission::Critique)?;

        let critique = Critique {
            id: Uuid::new_v4(),
            task_id,
            author_id: agent_id,
            content: request.content,
            severity: request.severity,
            issues: request.issues,
            created_at: Utc::now(),
        };
        let task = self.store.add_critique(&critique).await?;

        tracing::info!(
            "Critique {} filed on task {} by {} (status {})",
            critique.id,
            task_id,
            agent_id,
            task.status.as_str()
        );
        self.emit(TaskEvent::CritiqueSubmitted {
            lab_id: task.lab_id,
            task_id,
            critique_id: critique.id,
            author_id: agent_id,
            status: task.status,
        });
        Ok((task, critique))
    }

    /// `completed | critique_period -> voting`, pi only
    pub async fn start_voting(&self, task_id: Uuid, agent_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        self.active_membership(task.lab_id, agent_id)
            .await?
            .require(Permission::StartVoting)?;

        let task = self
            .store
            .transition_task(
                task_id,
                &TaskStatus::predecessors_of(TaskStatus::Voting),
                TaskStatus::Voting,
            )
            .await?;

        tracing::info!("Voting started on task {} by {}", task_id, agent_id);
        self.emit(TaskEvent::VotingStarted {
            lab_id: task.lab_id,
            task_id,
        });
        Ok(task)
    }

    /// Record a ballot; resolution happens in the same transaction
    pub async fn vote(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        vote: &str,
        reasoning: Option<&str>,
    ) -> Result<VoteReceipt> {
        let value: VoteValue = vote.parse().map_err(AppError::ValidationFailed)?;

        let task = self.store.get_task(task_id).await?;
        self.active_membership(task.lab_id, agent_id)
            .await?
            .require(Permission::Vote)?;

        let receipt = self
            .store
            .cast_vote(task_id, agent_id, value, reasoning)
            .await?;

        tracing::debug!("Agent {} voted {} on task {}", agent_id, value.as_str(), task_id);
        self.emit(TaskEvent::VoteCast {
            lab_id: task.lab_id,
            task_id,
            agent_id,
            vote: value,
        });
        if receipt.resolved {
            self.emit(TaskEvent::TaskResolved {
                lab_id: task.lab_id,
                task_id,
                status: receipt.summary.status,
                approve: receipt.summary.tally.approve,
                reject: receipt.summary.tally.reject,
            });
        }
        Ok(receipt)
    }

    /// Administrative override to `superseded` from any non-terminal status
    pub async fn supersede(&self, task_id: Uuid, agent_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        self.active_membership(task.lab_id, agent_id)
            .await?
            .require(Permission::Supersede)?;

        let task = self
            .store
            .transition_task(
                task_id,
                &TaskStatus::predecessors_of(TaskStatus::Superseded),
                TaskStatus::Superseded,
            )
            .await?;

        tracing::info!("Task {} superseded by {}", task_id, agent_id);
        self.emit(TaskEvent::TaskSuperseded {
            lab_id: task.lab_id,
            task_id,
            superseded_by: agent_id,
        });
        Ok(task)
    }

    // Reads

    /// Fetch a task. A task in `voting` is re-checked for quorum first, so
    /// a departure that lowered the quorum resolves it on the next read.
    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Voting {
            return Ok(task);
        }

        let (summary, resolved) = self.store.resolve_voting(task_id).await?;
        if !resolved {
            return Ok(task);
        }

        self.emit(TaskEvent::TaskResolved {
            lab_id: task.lab_id,
            task_id,
            status: summary.status,
            approve: summary.tally.approve,
            reject: summary.tally.reject,
        });
        self.store.get_task(task_id).await
    }

    pub async fn list_tasks(&self, lab_id: Uuid, status: Option<&str>) -> Result<Vec<Task>> {
        self.store.get_lab(lab_id).await?;
        let status = status
            .map(|s| s.parse::<TaskStatus>().map_err(AppError::ValidationFailed))
            .transpose()?;
        self.store.list_tasks(lab_id, status).await
    }

    pub async fn list_critiques(&self, task_id: Uuid) -> Result<Vec<Critique>> {
        self.store.get_task(task_id).await?;
        self.store.list_critiques(task_id).await
    }

    pub async fn list_votes(&self, task_id: Uuid) -> Result<VoteListing> {
        // Resolve first so the summary reflects the current membership
        self.get_task(task_id).await?;
        let votes = self.store.list_votes(task_id).await?;
        let summary = self.store.vote_summary(task_id).await?;
        Ok(VoteListing { votes, summary })
    }

    /// Broadcast a reconciled provider job
    pub async fn notify_job_update(&self, job: &ProviderJob) -> Result<()> {
        let task = self.store.get_task(job.task_id).await?;
        self.emit(TaskEvent::ProviderJobUpdated {
            lab_id: task.lab_id,
            task_id: job.task_id,
            job_id: job.id,
            kind: job.kind,
            status: job.status,
        });
        Ok(())
    }
}
