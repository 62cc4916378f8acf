//! Lifecycle state machines for nodes and instances.
//!
//! Both status enums are closed sets; the valid edges live here as
//! exhaustive matches so every caller enforces the same machine.
//!
//! Node status:
//!
//! ```text
//! ALIVE → DRAIN_PENDING → DRAINING → DRAINED
//!            │               │
//!            └→ DRAIN_FAILED ←┘ → ALIVE
//! DEAD reachable from any state; terminal.
//! ```
//!
//! Instance status:
//!
//! ```text
//! UNSPECIFIED → STARTING → RUNNING ⇄ IDLE → STOPPING → STOPPED
//!   RUNNING/IDLE → FAILING (→ RUNNING on recovery, → STOPPED on GC)
//!   IDLE → DRAIN_CONFIRMATION_PENDING → DRAIN_REQUEST → STOPPING
//!   RUNNING/IDLE → PREEMPT_REQUEST → STOPPING
//! ```

use thiserror::Error;

use crate::types::{InstanceStatus, NodeStatus};

/// A transition that does not follow the state machine's edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid node status transition: {from:?} → {to:?}")]
    Node { from: NodeStatus, to: NodeStatus },

    #[error("invalid instance status transition: {from:?} → {to:?}")]
    Instance {
        from: InstanceStatus,
        to: InstanceStatus,
    },
}

impl NodeStatus {
    /// Whether the edge `self → next` exists in the node state machine.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;

        // DEAD is reachable from any state and terminal.
        if next == Dead {
            return self != Dead;
        }

        matches!(
            (self, next),
            (Alive, DrainPending)
                | (DrainPending, Draining)
                | (DrainPending, DrainFailed)
                | (Draining, Drained)
                | (Draining, DrainFailed)
                | (DrainFailed, Alive)
        )
    }

    /// Validate an edge, producing a typed error for invalid ones.
    pub fn transition_to(self, next: NodeStatus) -> Result<NodeStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Node {
                from: self,
                to: next,
            })
        }
    }

    /// A node no longer in (or heading out of) the schedulable pool.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Dead)
    }
}

impl InstanceStatus {
    /// Whether the edge `self → next` exists in the instance state machine.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;

        matches!(
            (self, next),
            (Unspecified, Starting)
                | (Starting, Running)
                | (Running, Idle)
                | (Idle, Running)
                | (Idle, Stopping)
                | (Stopping, Stopped)
                | (Running, Failing)
                | (Idle, Failing)
                // An instance may recover from FAILING...
                | (Failing, Running)
                // ...or be garbage-collected once contact is lost for good.
                | (Failing, Stopped)
                | (Idle, DrainConfirmationPending)
                | (DrainConfirmationPending, DrainRequest)
                | (DrainConfirmationPending, Idle)
                | (DrainConfirmationPending, Running)
                | (DrainRequest, Stopping)
                | (Running, PreemptRequest)
                | (Idle, PreemptRequest)
                | (PreemptRequest, Stopping)
        )
    }

    /// Validate an edge, producing a typed error for invalid ones.
    pub fn transition_to(self, next: InstanceStatus) -> Result<InstanceStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Instance {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Stopped)
    }
}
