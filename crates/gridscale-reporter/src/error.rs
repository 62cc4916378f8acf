//! Error types for the reporter side.

use thiserror::Error;

use gridscale_model::TransitionError;

/// Result type alias for instance pool operations.
pub type ReporterResult<T> = Result<T, ReporterError>;

/// Errors from reporter-side instance bookkeeping.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    #[error("empty instance id")]
    EmptyInstanceId,

    #[error("duplicate instance id: {0}")]
    DuplicateInstanceId(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Errors surfaced by the synchronization channel.
///
/// A transport failure is an unknown outcome: the report is versioned,
/// so a blind retry with the same or an incremented version is always
/// safe.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("report rejected as stale: submitted {submitted} <= stored {stored}")]
    StaleReport { submitted: u64, stored: u64 },

    #[error("report rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}
