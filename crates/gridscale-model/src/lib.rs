//! gridscale-model — the resource state model shared by the authority
//! and the autoscaler reporter.
//!
//! Plain data only: resource requests, placement constraints, node and
//! instance state, the two lifecycle state machines, and the wire shapes
//! of the synchronization protocol. No behavior beyond validation and
//! transition rules lives here.

pub mod constraint;
pub mod lifecycle;
pub mod types;
pub mod wire;

pub use constraint::{AntiAffinityConstraint, PlacementConstraint, placement_group_constraint};
pub use lifecycle::TransitionError;
pub use types::*;
pub use wire::*;
