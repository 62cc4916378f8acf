//! gridscale-reporter — the autoscaler's side of the state
//! synchronization protocol.
//!
//! Owns the provisioning-layer `Instance` entries and their lifecycle
//! machine, classifies pending demand by feasibility against the
//! launchable node shapes, and runs the polling loop that exchanges
//! state with the authority under strictly increasing versions.

pub mod error;
pub mod feasibility;
pub mod instances;
pub mod reporter;

pub use error::{ReporterError, ReporterResult, SyncError};
pub use feasibility::{InfeasibleDemand, NodeTypeSpec};
pub use instances::InstancePool;
pub use reporter::{LocalSyncClient, Reporter, StateSyncClient, SyncOutcome};
