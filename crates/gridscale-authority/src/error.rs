//! Error types for the state authority.

use thiserror::Error;

use gridscale_model::TransitionError;

/// Result type alias for authority operations.
pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Rejections and failures surfaced by the authority.
///
/// Every rejection is observable to the caller; a rejected report never
/// mutates the aggregate.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("stale report: autoscaler state version {submitted} <= stored {stored}")]
    StaleReport { submitted: u64, stored: u64 },

    #[error(
        "report computed against stale snapshot: version {reported} is more than \
         {bound} behind current {current}"
    )]
    StaleSnapshot {
        reported: u64,
        current: u64,
        bound: u64,
    },

    #[error("empty instance id in report")]
    EmptyInstanceId,

    #[error("duplicate instance id in report: {0}")]
    DuplicateInstanceId(String),

    #[error("empty node id")]
    EmptyNodeId,

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("placement constraint not satisfied on node {0}")]
    ConstraintViolated(String),

    #[error("resource invariant violated on node {node_id}: available {resource} exceeds total")]
    ResourceInvariant { node_id: String, resource: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the redb persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
