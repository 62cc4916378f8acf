//! gridscale-authority — the system-of-record for cluster resources
//! and outstanding demand.
//!
//! The authority owns `NodeState` (ground truth from the cluster's
//! resource-tracking feed) and records the reporter's view of
//! `Instance`s as submitted through the synchronization protocol. All
//! mutation flows through one serialization point so the cluster state
//! version is a total order; snapshot reads are isolated against
//! concurrent writes.

pub mod authority;
pub mod error;
pub mod store;

pub use authority::StateAuthority;
pub use error::{AuthorityError, AuthorityResult, StoreError};
