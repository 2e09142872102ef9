//! Provider job model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::normalize::NormalizedResult;
use crate::lifecycle::TaskType;

/// Which upstream service runs the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Literature,
    Analysis,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Literature => "literature",
            JobKind::Analysis => "analysis",
        }
    }

    /// Wall-clock polling budget before callers should fall back to a
    /// degraded completion
    pub fn polling_budget(&self) -> Duration {
        match self {
            JobKind::Literature => Duration::minutes(20),
            JobKind::Analysis => Duration::minutes(60),
        }
    }

    /// Whether jobs of this kind can back a task of `task_type`
    pub fn serves(&self, task_type: TaskType) -> bool {
        matches!(
            (self, task_type),
            (JobKind::Literature, TaskType::LiteratureReview)
                | (JobKind::Literature, TaskType::DeepResearch)
                | (JobKind::Analysis, TaskType::Analysis)
                | (JobKind::Analysis, TaskType::DeepResearch)
        )
    }

    /// Job kinds whose output belongs with a task of `task_type`
    pub fn for_task_type(task_type: TaskType) -> Vec<JobKind> {
        [JobKind::Literature, JobKind::Analysis]
            .into_iter()
            .filter(|k| k.serves(task_type))
            .collect()
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "literature" => Ok(JobKind::Literature),
            "analysis" => Ok(JobKind::Analysis),
            _ => Err(format!("Invalid job kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Handle to an asynchronous upstream computation bound to one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderJob {
    pub id: Uuid,
    pub task_id: Uuid,
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_result: Option<NormalizedResult>,
    /// Untouched upstream payload from the latest poll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProviderJob {
    /// A non-terminal job that has outlived its kind's polling budget
    pub fn budget_exceeded(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now - self.created_at > self.kind.polling_budget()
    }
}

/// Job projection returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: ProviderJob,
    pub budget_exceeded: bool,
}

impl From<ProviderJob> for JobView {
    fn from(job: ProviderJob) -> Self {
        let budget_exceeded = job.budget_exceeded(Utc::now());
        Self {
            job,
            budget_exceeded,
        }
    }
}
