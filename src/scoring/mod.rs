//! Verification and scoring of task results
//!
//! Turns a completed task's structured result into a trust score and a
//! green/amber/red badge by combining a task-type-specific domain adapter
//! with weighted cross-cutting verifiers.

pub mod adapters;
pub mod cross_cutting;
pub mod engine;
pub mod types;

use uuid::Uuid;

use crate::lifecycle::{Task, TaskType};

pub use adapters::DomainAdapter;
pub use cross_cutting::CrossCuttingVerifier;
pub use engine::VerificationEngine;
pub use types::{
    fail_result, merge, Badge, CrossCuttingResult, VerificationResult, DEFAULT_DOMAIN_WEIGHT,
};

/// Task attributes available to verifiers alongside the result payload
#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
}

impl From<&Task> for TaskMetadata {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type,
            title: task.title.clone(),
            description: task.description.clone(),
        }
    }
}
