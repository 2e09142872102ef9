//! Labs, memberships, and the role policy that gates task operations

pub mod membership;
pub mod role;

pub use membership::{Membership, MembershipStatus};
pub use role::{Permission, Role};
