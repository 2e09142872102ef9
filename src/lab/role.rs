//! Role model for lab members
//!
//! Maps a member's role to the task types they may pick up and the
//! lifecycle operations they may perform.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::lifecycle::TaskType;

/// Operations gated by role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Can propose new tasks
    Propose,
    /// Can pick up any task type regardless of the role's own list
    PickUpAny,
    /// Can complete a task on behalf of its assignee
    CompleteOverride,
    /// Can file critiques on completed work
    Critique,
    /// Can open voting on a completed task
    StartVoting,
    /// Can cast votes
    Vote,
    /// Can withdraw a task from any non-terminal status
    Supersede,
    /// Can start provider jobs for tasks assigned to someone else
    StartJobOverride,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Propose => "propose",
            Permission::PickUpAny => "pick_up_any",
            Permission::CompleteOverride => "complete_override",
            Permission::Critique => "critique",
            Permission::StartVoting => "start_voting",
            Permission::Vote => "vote",
            Permission::Supersede => "supersede",
            Permission::StartJobOverride => "start_job_override",
        }
    }
}

/// Role held by a lab member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Principal investigator
    Pi,
    Scout,
    ResearchAnalyst,
    Critic,
    Synthesizer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pi => "pi",
            Role::Scout => "scout",
            Role::ResearchAnalyst => "research_analyst",
            Role::Critic => "critic",
            Role::Synthesizer => "synthesizer",
        }
    }

    /// Task types this role picks up in the normal course of work
    pub fn task_types(&self) -> &'static [TaskType] {
        match self {
            Role::Pi => &TaskType::ALL,
            Role::Scout => &[TaskType::LiteratureReview],
            Role::ResearchAnalyst => &[TaskType::Analysis, TaskType::DeepResearch],
            Role::Critic => &[TaskType::Critique],
            Role::Synthesizer => &[TaskType::Synthesis],
        }
    }

    /// Permissions granted to this role
    pub fn permissions(&self) -> HashSet<Permission> {
        let mut perms = HashSet::new();
        perms.insert(Permission::Propose);
        perms.insert(Permission::Vote);
        match self {
            Role::Pi => {
                perms.insert(Permission::PickUpAny);
                perms.insert(Permission::CompleteOverride);
                perms.insert(Permission::Critique);
                perms.insert(Permission::StartVoting);
                perms.insert(Permission::Supersede);
                perms.insert(Permission::StartJobOverride);
            }
            Role::Critic => {
                perms.insert(Permission::Critique);
            }
            Role::Scout | Role::ResearchAnalyst | Role::Synthesizer => {}
        }
        perms
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Whether this role may pick up a task of the given type
    pub fn can_pick_up(&self, task_type: TaskType) -> bool {
        self.has(Permission::PickUpAny) || self.task_types().contains(&task_type)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pi" => Ok(Role::Pi),
            "scout" => Ok(Role::Scout),
            "research_analyst" => Ok(Role::ResearchAnalyst),
            "critic" => Ok(Role::Critic),
            "synthesizer" => Ok(Role::Synthesizer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}
