//! Tasks and their status graph
//!
//! A task moves forward through
//! `proposed -> in_progress -> completed -> critique_period -> voting -> accepted | rejected`,
//! with `superseded` reachable from any non-terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::scoring::Badge;

/// Kind of research work a task asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LiteratureReview,
    Analysis,
    DeepResearch,
    Critique,
    Synthesis,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::LiteratureReview,
        TaskType::Analysis,
        TaskType::DeepResearch,
        TaskType::Critique,
        TaskType::Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::LiteratureReview => "literature_review",
            TaskType::Analysis => "analysis",
            TaskType::DeepResearch => "deep_research",
            TaskType::Critique => "critique",
            TaskType::Synthesis => "synthesis",
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "literature_review" => Ok(TaskType::LiteratureReview),
            "analysis" => Ok(TaskType::Analysis),
            "deep_research" => Ok(TaskType::DeepResearch),
            "critique" => Ok(TaskType::Critique),
            "synthesis" => Ok(TaskType::Synthesis),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Proposed and waiting for someone to pick it up
    Proposed,
    /// Assigned and being worked on
    InProgress,
    /// Result submitted and scored
    Completed,
    /// At least one critique has been filed
    CritiquePeriod,
    /// Lab members are voting on the result
    Voting,
    Accepted,
    Rejected,
    /// Administratively withdrawn
    Superseded,
}

impl TaskStatus {
    pub const NON_TERMINAL: [TaskStatus; 5] = [
        TaskStatus::Proposed,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::CritiquePeriod,
        TaskStatus::Voting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Proposed => "proposed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::CritiquePeriod => "critique_period",
            TaskStatus::Voting => "voting",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Superseded => "superseded",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Accepted | TaskStatus::Rejected | TaskStatus::Superseded
        )
    }

    /// Whether voting on this task has been decided
    pub fn is_resolved(&self) -> bool {
        matches!(self, TaskStatus::Accepted | TaskStatus::Rejected)
    }

    /// Statuses directly reachable from this one
    pub fn next_statuses(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Proposed => &[TaskStatus::InProgress, TaskStatus::Superseded],
            TaskStatus::InProgress => &[TaskStatus::Completed, TaskStatus::Superseded],
            TaskStatus::Completed => &[
                TaskStatus::CritiquePeriod,
                TaskStatus::Voting,
                TaskStatus::Superseded,
            ],
            TaskStatus::CritiquePeriod => &[TaskStatus::Voting, TaskStatus::Superseded],
            TaskStatus::Voting => &[
                TaskStatus::Accepted,
                TaskStatus::Rejected,
                TaskStatus::Superseded,
            ],
            TaskStatus::Accepted | TaskStatus::Rejected | TaskStatus::Superseded => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.next_statuses().contains(&next)
    }

    /// Every status from which `target` is directly reachable
    pub fn predecessors_of(target: TaskStatus) -> Vec<TaskStatus> {
        TaskStatus::NON_TERMINAL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    /// Fail with `InvalidState` unless `next` is reachable from this status
    pub fn ensure_transition(&self, next: TaskStatus) -> Result<(), AppError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(AppError::InvalidState(format!(
                "Cannot move task from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(TaskStatus::Proposed),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "critique_period" => Ok(TaskStatus::CritiquePeriod),
            "voting" => Ok(TaskStatus::Voting),
            "accepted" => Ok(TaskStatus::Accepted),
            "rejected" => Ok(TaskStatus::Rejected),
            "superseded" => Ok(TaskStatus::Superseded),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// A unit of work owned by a lab
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Agent that proposed the task
    pub proposed_by: Uuid,
    /// Agent holding the assignment, set once the task is picked up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Uuid>,
    /// Structured result payload submitted on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_score: Option<f64>,
    /// Full scoring breakdown recorded on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a freshly proposed task
    pub fn new(
        lab_id: Uuid,
        proposed_by: Uuid,
        title: impl Into<String>,
        description: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lab_id,
            title: title.into(),
            description: description.into(),
            task_type,
            status: TaskStatus::Proposed,
            proposed_by,
            assigned_to: None,
            result: None,
            verification_score: None,
            verification: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            resolved_at: None,
        }
    }

    pub fn badge(&self) -> Option<Badge> {
        self.verification_score.map(Badge::from_score)
    }

    pub fn is_assigned_to(&self, agent_id: Uuid) -> bool {
        self.assigned_to == Some(agent_id)
    }
}
