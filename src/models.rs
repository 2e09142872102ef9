//! Data models for labs and critiques, plus request bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A lab is the collaboration group owning tasks and memberships
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lab {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Advisory critique filed against a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a new lab
#[derive(Debug, Deserialize)]
pub struct CreateLabRequest {
    pub slug: String,
    pub name: String,
}

/// Request to join a lab
#[derive(Debug, Deserialize)]
pub struct JoinLabRequest {
    pub role: String,
}

/// Request to propose a task
#[derive(Debug, Deserialize)]
pub struct ProposeTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub task_type: String,
}

/// Request to complete a task with a structured result
#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    pub result: serde_json::Value,
}

/// Request to file a critique
#[derive(Debug, Deserialize)]
pub struct CritiqueRequest {
    pub content: String,
    pub severity: Option<String>,
    pub issues: Option<serde_json::Value>,
}

/// Request to cast a vote
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub vote: String,
    pub reasoning: Option<String>,
}

/// Request to start a provider job for a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub kind: String,
    /// Research question for literature jobs; defaults to the task title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Dataset references for analysis jobs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Query for filtering task listings
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
}

/// Pagination query
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    20
}
