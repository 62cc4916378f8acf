//! Domain types for the cluster resource state model.
//!
//! These types describe demand (resource requests, gangs, cluster-wide
//! constraints) and supply (node state at the scheduling layer, instance
//! state at the provisioning layer). All types are serializable to/from
//! JSON for the wire protocol and the authority's persistence layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constraint::PlacementConstraint;

/// Scheduling-layer identity of a node.
pub type NodeId = String;

/// Provisioning-layer identity of an instance.
pub type InstanceId = String;

/// Resource-name → quantity. Quantities are non-negative.
pub type ResourceMap = HashMap<String, f64>;

/// Reserved label marking placement-group occupancy on a node.
pub const PLACEMENT_GROUP_LABEL: &str = "_PG";

/// True if every quantity in `required` fits within `available`.
pub fn resources_fit(required: &ResourceMap, available: &ResourceMap) -> bool {
    required
        .iter()
        .all(|(name, qty)| available.get(name).copied().unwrap_or(0.0) >= *qty)
}

// ── Demand ────────────────────────────────────────────────────────

/// One schedulable unit of demand: the resources it needs plus the
/// placement constraints the target node must satisfy (AND semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resources: ResourceMap,
    #[serde(default)]
    pub constraints: Vec<PlacementConstraint>,
}

impl ResourceRequest {
    pub fn new(resources: ResourceMap) -> Self {
        Self {
            resources,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: PlacementConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Pending demand aggregated by identical request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequestByCount {
    pub request: ResourceRequest,
    pub count: u64,
}

/// An ordered set of requests that must be allocated atomically — all
/// succeed together or none are allocated. Models placement groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GangResourceRequest {
    pub requests: Vec<ResourceRequest>,
    /// Originating job, when the gang is job-attributed.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// A floor on total cluster capacity attributed to an issuing job.
///
/// The cluster must be sized so this capacity could be satisfied in
/// aggregate; violation signals under-provisioning independent of any
/// specific pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResourceConstraint {
    pub job_id: String,
    pub bundles: Vec<ResourceRequestByCount>,
}

// ── Nodes (scheduling layer, authority-owned) ─────────────────────

/// Status of a node in the schedulable pool.
///
/// Valid transitions are encoded in [`NodeStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Alive,
    Dead,
    DrainPending,
    Draining,
    DrainFailed,
    Drained,
}

/// Scheduling-layer view of a node. Owned and mutated exclusively by
/// the authority; reflects ground truth observed inside the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: NodeId,
    /// Provisioning-layer identity of the backing instance.
    pub instance_id: InstanceId,
    pub node_type: String,
    pub total_resources: ResourceMap,
    pub available_resources: ResourceMap,
    /// Mutable key/value tags; `_PG` is reserved for placement groups.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Strictly increases on every mutation to resources, labels, or status.
    pub node_state_version: u64,
    pub status: NodeStatus,
}

impl NodeState {
    /// Check the componentwise invariant `available ≤ total`.
    ///
    /// Returns the first offending resource name, if any.
    pub fn resource_invariant_violation(&self) -> Option<&str> {
        self.available_resources
            .iter()
            .find(|(name, avail)| {
                let total = self.total_resources.get(*name).copied().unwrap_or(0.0);
                **avail > total
            })
            .map(|(name, _)| name.as_str())
    }
}

// ── Instances (provisioning layer, reporter-owned) ────────────────

/// Lifecycle status of a provisioned instance.
///
/// Valid transitions are encoded in [`InstanceStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Unspecified,
    Starting,
    Running,
    Idle,
    Stopping,
    Stopped,
    Failing,
    /// An external decision-maker must approve or reject a drain
    /// proposed due to idleness.
    DrainConfirmationPending,
    DrainRequest,
    /// Unconditional: downstream must proceed to `Stopping` regardless
    /// of drainability.
    PreemptRequest,
}

/// Provisioning-layer view of a node. Owned and mutated exclusively by
/// the reporter. May exist before the corresponding `NodeState` does
/// and may persist briefly after it goes `Dead`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub node_type: String,
    pub status: InstanceStatus,
    pub total_resources: ResourceMap,
    /// Unix timestamp (seconds) of the last status transition.
    pub status_changed_at: u64,
}
