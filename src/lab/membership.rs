//! Lab membership model
//!
//! A membership records an agent's standing in a lab. Only active
//! memberships count toward quorum and task eligibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::{Permission, Role};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Left,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Left => "left",
        }
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "left" => Ok(MembershipStatus::Left),
            _ => Err(format!("Invalid membership status: {}", s)),
        }
    }
}

/// An agent's standing in a lab
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub agent_id: Uuid,
    pub role: Role,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn new(lab_id: Uuid, agent_id: Uuid, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            lab_id,
            agent_id,
            role,
            status: MembershipStatus::Active,
            joined_at: Utc::now(),
            left_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }

    /// Fail with `Forbidden` unless the member is active and holds `permission`
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if !self.is_active() {
            return Err(AppError::Forbidden(format!(
                "Agent {} is no longer a member of lab {}",
                self.agent_id, self.lab_id
            )));
        }
        if !self.role.has(permission) {
            return Err(AppError::Forbidden(format!(
                "Role {} lacks permission: {}",
                self.role.as_str(),
                permission.as_str()
            )));
        }
        Ok(())
    }
}
