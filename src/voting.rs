//! Quorum and tally rules for resolving a task out of `voting`
//!
//! The tally is always recomputed from the current vote set. The store
//! applies these rules inside the same transaction that records a vote,
//! so two concurrent ballots cannot both resolve the task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Approve,
    Reject,
    Abstain,
}

impl VoteValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteValue::Approve => "approve",
            VoteValue::Reject => "reject",
            VoteValue::Abstain => "abstain",
        }
    }

    /// Approve and reject count toward quorum; abstain does not
    pub fn is_substantive(&self) -> bool {
        !matches!(self, VoteValue::Abstain)
    }
}

impl std::str::FromStr for VoteValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(VoteValue::Approve),
            "reject" => Ok(VoteValue::Reject),
            "abstain" => Ok(VoteValue::Abstain),
            _ => Err(format!("Invalid vote: {}", s)),
        }
    }
}

/// An agent's current ballot on a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub vote: VoteValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Substantive votes needed before a task can resolve
pub fn quorum(active_members: usize) -> usize {
    active_members.div_ceil(2).max(2)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub approve: usize,
    pub reject: usize,
    pub abstain: usize,
}

impl Tally {
    pub fn from_votes<I>(votes: I) -> Self
    where
        I: IntoIterator<Item = VoteValue>,
    {
        votes.into_iter().fold(Tally::default(), |mut tally, vote| {
            match vote {
                VoteValue::Approve => tally.approve += 1,
                VoteValue::Reject => tally.reject += 1,
                VoteValue::Abstain => tally.abstain += 1,
            }
            tally
        })
    }

    pub fn substantive(&self) -> usize {
        self.approve + self.reject
    }

    /// Resolution once quorum is met: accepted only on a strict approve
    /// majority, so a tie rejects.
    pub fn outcome(&self, quorum: usize) -> Option<TaskStatus> {
        if self.substantive() < quorum {
            return None;
        }
        if self.approve > self.reject {
            Some(TaskStatus::Accepted)
        } else {
            Some(TaskStatus::Rejected)
        }
    }
}

/// Tally snapshot returned with vote listings and receipts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteSummary {
    pub tally: Tally,
    pub quorum: usize,
    pub active_members: usize,
    pub status: TaskStatus,
}

/// Acknowledgement for a recorded vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote: Vote,
    pub summary: VoteSummary,
    /// Whether this ballot is the one that closed voting
    pub resolved: bool,
}

/// Current ballots on a task with their tally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteListing {
    pub votes: Vec<Vote>,
    pub summary: VoteSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use VoteValue::*;

    #[test]
    fn test_quorum_floor_is_two() {
        assert_eq!(quorum(0), 2);
        assert_eq!(quorum(1), 2);
        assert_eq!(quorum(2), 2);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 2);
        assert_eq!(quorum(5), 3);
        assert_eq!(quorum(6), 3);
        assert_eq!(quorum(7), 4);
    }

    #[test]
    fn test_abstain_does_not_count() {
        let tally = Tally::from_votes([Approve, Abstain, Abstain]);
        assert_eq!(tally.substantive(), 1);
        assert_eq!(tally.outcome(2), None);
    }

    #[test]
    fn test_four_members_two_approvals_accept() {
        let tally = Tally::from_votes([Approve, Approve]);
        assert_eq!(tally.outcome(quorum(4)), Some(TaskStatus::Accepted));
    }

    #[test]
    fn test_five_members_majority_accepts() {
        let q = quorum(5);
        assert_eq!(Tally::from_votes([Approve, Reject]).outcome(q), None);
        assert_eq!(
            Tally::from_votes([Approve, Reject, Approve]).outcome(q),
            Some(TaskStatus::Accepted)
        );
    }

    #[test]
    fn test_tie_rejects() {
        let tally = Tally::from_votes([Approve, Reject]);
        assert_eq!(tally.outcome(2), Some(TaskStatus::Rejected));
    }

    #[test]
    fn test_every_outcome_is_covered_once() {
        for approve in 0..5 {
            for reject in 0..5 {
                let tally = Tally {
                    approve,
                    reject,
                    abstain: 0,
                };
                match tally.outcome(2) {
                    None => assert!(approve + reject < 2),
                    Some(TaskStatus::Accepted) => assert!(approve > reject),
                    Some(TaskStatus::Rejected) => assert!(approve <= reject),
                    Some(other) => panic!("unexpected outcome {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_vote_value_parsing() {
        assert_eq!("approve".parse::<VoteValue>().unwrap(), Approve);
        assert_eq!("abstain".parse::<VoteValue>().unwrap(), Abstain);
        assert!("maybe".parse::<VoteValue>().is_err());
        assert!(!Abstain.is_substantive());
        assert!(Reject.is_substantive());
    }
}
