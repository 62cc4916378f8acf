//! Wire shapes of the synchronization protocol.
//!
//! Two request/response RPCs tie the authority and the reporter
//! together. Both carry full state, never deltas — the array fields are
//! full replacements of the sender's view, and versions are the only
//! ordering signal. Changing this into an incremental protocol would
//! change the consistency contract.

use serde::{Deserialize, Serialize};

use crate::types::{
    ClusterResourceConstraint, GangResourceRequest, Instance, NodeState, ResourceRequest,
    ResourceRequestByCount,
};

/// `GetClusterResourceState` request.
///
/// `last_seen_cluster_resource_state_version` is informational — the
/// reply is always a full snapshot regardless of what the caller has
/// already seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetClusterResourceStateRequest {
    #[serde(default)]
    pub last_seen_cluster_resource_state_version: u64,
}

/// `GetClusterResourceState` reply: a consistent full snapshot.
///
/// The version is consistent with every collection in the same reply —
/// no partial update is ever visible mid-read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResourceStateSnapshot {
    pub cluster_resource_state_version: u64,
    /// Highest autoscaler state version the authority has recorded.
    pub last_seen_autoscaler_state_version: u64,
    pub node_states: Vec<NodeState>,
    pub pending_resource_requests: Vec<ResourceRequestByCount>,
    pub pending_gang_resource_requests: Vec<GangResourceRequest>,
    pub cluster_resource_constraints: Vec<ClusterResourceConstraint>,
}

/// `ReportAutoscalingState` request.
///
/// `instances` is the reporter's complete current view, not an
/// increment. The infeasible lists carry demand the reporter determined
/// it cannot satisfy, distinguishing "not yet scheduled" from
/// "unschedulable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportAutoscalingStateRequest {
    /// Snapshot version the decisions in this report were computed against.
    pub last_seen_cluster_resource_state_version: u64,
    /// Must be strictly greater than any version previously accepted.
    pub autoscaler_state_version: u64,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub infeasible_resource_requests: Vec<ResourceRequest>,
    #[serde(default)]
    pub infeasible_gang_resource_requests: Vec<GangResourceRequest>,
    #[serde(default)]
    pub infeasible_cluster_resource_constraints: Vec<ClusterResourceConstraint>,
}

/// Empty acknowledgment — absence of RPC success signals failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAutoscalingStateReply {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceStatus, ResourceMap};

    #[test]
    fn snapshot_serializes_with_all_collections() {
        let snap = ClusterResourceStateSnapshot {
            cluster_resource_state_version: 7,
            last_seen_autoscaler_state_version: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["cluster_resource_state_version"], 7);
        assert_eq!(json["node_states"], serde_json::json!([]));
        assert_eq!(json["pending_gang_resource_requests"], serde_json::json!([]));
    }

    #[test]
    fn report_request_defaults_omitted_arrays() {
        // A minimal report over the wire only needs the two versions.
        let json = serde_json::json!({
            "last_seen_cluster_resource_state_version": 5,
            "autoscaler_state_version": 6,
        });
        let req: ReportAutoscalingStateRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.autoscaler_state_version, 6);
        assert!(req.instances.is_empty());
        assert!(req.infeasible_resource_requests.is_empty());
    }

    #[test]
    fn instance_round_trips_through_json() {
        let inst = Instance {
            instance_id: "i1".to_string(),
            node_type: "standard".to_string(),
            status: InstanceStatus::Running,
            total_resources: ResourceMap::from([("CPU".to_string(), 4.0)]),
            status_changed_at: 1000,
        };
        let req = ReportAutoscalingStateRequest {
            last_seen_cluster_resource_state_version: 1,
            autoscaler_state_version: 1,
            instances: vec![inst.clone()],
            ..Default::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ReportAutoscalingStateRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.instances, vec![inst]);
    }
}
