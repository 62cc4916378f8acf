//! Feasibility classification of pending demand.
//!
//! The reporter knows which node shapes it could provision. Demand
//! that no launchable node type can ever satisfy is reported back as
//! infeasible so clients can tell "not yet scheduled" apart from
//! "unschedulable". Anything feasible simply stays pending.

use std::collections::HashMap;

use tracing::debug;

use gridscale_model::{
    ClusterResourceConstraint, ClusterResourceStateSnapshot, GangResourceRequest, ResourceMap,
    ResourceRequest, resources_fit,
};

/// A node shape the provisioning backend can launch.
#[derive(Debug, Clone)]
pub struct NodeTypeSpec {
    pub name: String,
    pub total_resources: ResourceMap,
    /// Labels a fresh node of this type carries from birth.
    pub labels: HashMap<String, String>,
}

/// Demand the reporter determined it cannot satisfy.
#[derive(Debug, Clone, Default)]
pub struct InfeasibleDemand {
    pub requests: Vec<ResourceRequest>,
    pub gang_requests: Vec<GangResourceRequest>,
    pub constraints: Vec<ClusterResourceConstraint>,
}

/// Whether a fresh node of this type could host the request: the
/// resources fit and every placement constraint is satisfiable
/// against the type's initial labels.
pub fn request_fits_node_type(request: &ResourceRequest, node_type: &NodeTypeSpec) -> bool {
    resources_fit(&request.resources, &node_type.total_resources)
        && request
            .constraints
            .iter()
            .all(|c| c.is_satisfied_by(&node_type.labels))
}

/// Whether any launchable node type can host the request.
pub fn is_request_feasible(request: &ResourceRequest, node_types: &[NodeTypeSpec]) -> bool {
    node_types
        .iter()
        .any(|nt| request_fits_node_type(request, nt))
}

/// A gang is all-or-nothing: if any bundle fits no node type, the
/// whole gang is unschedulable.
pub fn is_gang_feasible(gang: &GangResourceRequest, node_types: &[NodeTypeSpec]) -> bool {
    gang.requests
        .iter()
        .all(|request| is_request_feasible(request, node_types))
}

/// A capacity floor is unsatisfiable if any of its bundle shapes is.
pub fn is_constraint_feasible(
    constraint: &ClusterResourceConstraint,
    node_types: &[NodeTypeSpec],
) -> bool {
    constraint
        .bundles
        .iter()
        .all(|bundle| is_request_feasible(&bundle.request, node_types))
}

/// Classify every piece of pending demand in a snapshot.
pub fn classify(
    snapshot: &ClusterResourceStateSnapshot,
    node_types: &[NodeTypeSpec],
) -> InfeasibleDemand {
    let mut infeasible = InfeasibleDemand::default();

    for pending in &snapshot.pending_resource_requests {
        if !is_request_feasible(&pending.request, node_types) {
            infeasible.requests.push(pending.request.clone());
        }
    }
    for gang in &snapshot.pending_gang_resource_requests {
        if !is_gang_feasible(gang, node_types) {
            infeasible.gang_requests.push(gang.clone());
        }
    }
    for constraint in &snapshot.cluster_resource_constraints {
        if !is_constraint_feasible(constraint, node_types) {
            infeasible.constraints.push(constraint.clone());
        }
    }

    if !infeasible.requests.is_empty()
        || !infeasible.gang_requests.is_empty()
        || !infeasible.constraints.is_empty()
    {
        debug!(
            requests = infeasible.requests.len(),
            gangs = infeasible.gang_requests.len(),
            constraints = infeasible.constraints.len(),
            "infeasible demand detected"
        );
    }

    infeasible
}
