//! The cluster resource state authority.
//!
//! System-of-record for node resources and outstanding demand. The
//! whole aggregate lives behind one mutex so the cluster state version
//! is a true total order over all mutations: feed-side node updates,
//! demand bookkeeping, and report acceptance all serialize through it.
//! Snapshot reads clone the aggregate under the same lock, so a
//! returned version is always consistent with the collections beside
//! it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gridscale_model::{
    ClusterResourceConstraint, ClusterResourceStateSnapshot, GangResourceRequest,
    GetClusterResourceStateRequest, Instance, NodeId, NodeState, NodeStatus,
    ReportAutoscalingStateReply, ReportAutoscalingStateRequest, ResourceMap, ResourceRequest,
    ResourceRequestByCount, resources_fit,
};

use crate::error::{AuthorityError, AuthorityResult};
use crate::store::AuthorityStore;

/// The serializable aggregate owned by the authority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateState {
    /// Bumped on every observable change to nodes, demand, or constraints.
    pub(crate) cluster_resource_state_version: u64,
    /// Highest autoscaler state version accepted so far.
    pub(crate) last_seen_autoscaler_state_version: u64,
    /// Snapshot version the last accepted report was computed against.
    pub(crate) last_report_snapshot_version: u64,
    pub(crate) nodes: BTreeMap<NodeId, NodeState>,
    pub(crate) pending_requests: Vec<ResourceRequestByCount>,
    pub(crate) pending_gang_requests: Vec<GangResourceRequest>,
    pub(crate) cluster_constraints: Vec<ClusterResourceConstraint>,
    /// Reporter-owned view, stored verbatim from the last accepted report.
    pub(crate) instances: Vec<Instance>,
    pub(crate) infeasible_requests: Vec<ResourceRequest>,
    pub(crate) infeasible_gang_requests: Vec<GangResourceRequest>,
    pub(crate) infeasible_constraints: Vec<ClusterResourceConstraint>,
}

struct Inner {
    state: AggregateState,
    store: Option<AuthorityStore>,
    /// When set, reports computed against snapshots more than this many
    /// versions behind are discarded.
    staleness_bound: Option<u64>,
}

/// Thread-safe handle to the cluster resource state authority.
#[derive(Clone)]
pub struct StateAuthority {
    inner: Arc<Mutex<Inner>>,
}

impl StateAuthority {
    /// Create an ephemeral authority starting at version 0.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: AggregateState::default(),
                store: None,
                staleness_bound: None,
            })),
        }
    }

    /// Open a persistent authority, resuming from the last saved
    /// aggregate if one exists.
    pub fn open(path: &Path) -> AuthorityResult<Self> {
        let store = AuthorityStore::open(path)?;
        let state = store.load()?.unwrap_or_default();
        info!(
            version = state.cluster_resource_state_version,
            nodes = state.nodes.len(),
            "authority state loaded"
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                store: Some(store),
                staleness_bound: None,
            })),
        })
    }

    /// Reject reports computed against snapshots more than `bound`
    /// versions behind the current one.
    pub fn with_staleness_bound(self, bound: u64) -> Self {
        self.inner.lock().staleness_bound = Some(bound);
        self
    }

    /// Current cluster resource state version.
    pub fn current_version(&self) -> u64 {
        self.inner.lock().state.cluster_resource_state_version
    }

    /// Highest autoscaler state version accepted so far.
    pub fn last_seen_autoscaler_state_version(&self) -> u64 {
        self.inner.lock().state.last_seen_autoscaler_state_version
    }

    /// Snapshot version the last accepted report was computed against.
    /// Diagnostic: how fresh the reporter's view was when it decided.
    pub fn last_report_snapshot_version(&self) -> u64 {
        self.inner.lock().state.last_report_snapshot_version
    }

    // ── Protocol: GetClusterResourceState ─────────────────────────

    /// Serve a full, internally consistent snapshot of the aggregate.
    ///
    /// The caller's `last_seen_cluster_resource_state_version` is
    /// diagnostic only — this is a full-state protocol, not a delta
    /// protocol. Read-only; no side effects.
    pub fn get_cluster_resource_state(
        &self,
        req: &GetClusterResourceStateRequest,
    ) -> ClusterResourceStateSnapshot {
        let inner = self.inner.lock();
        let state = &inner.state;
        debug!(
            caller_last_seen = req.last_seen_cluster_resource_state_version,
            version = state.cluster_resource_state_version,
            "serving cluster resource state"
        );
        ClusterResourceStateSnapshot {
            cluster_resource_state_version: state.cluster_resource_state_version,
            last_seen_autoscaler_state_version: state.last_seen_autoscaler_state_version,
            node_states: state.nodes.values().cloned().collect(),
            pending_resource_requests: state.pending_requests.clone(),
            pending_gang_resource_requests: state.pending_gang_requests.clone(),
            cluster_resource_constraints: state.cluster_constraints.clone(),
        }
    }

    // ── Protocol: ReportAutoscalingState ──────────────────────────

    /// Accept or reject a reporter-side state report.
    ///
    /// Validation is all-or-nothing: the report either passes every
    /// check and replaces the stored reporter view in full, or is
    /// rejected without touching the aggregate. The version compare
    /// and the apply happen in one critical section, so racing
    /// reporters cannot interleave destructively.
    pub fn report_autoscaling_state(
        &self,
        req: ReportAutoscalingStateRequest,
    ) -> AuthorityResult<ReportAutoscalingStateReply> {
        let mut inner = self.inner.lock();

        let stored = inner.state.last_seen_autoscaler_state_version;
        if req.autoscaler_state_version <= stored {
            warn!(
                submitted = req.autoscaler_state_version,
                stored, "rejecting stale autoscaler state report"
            );
            return Err(AuthorityError::StaleReport {
                submitted: req.autoscaler_state_version,
                stored,
            });
        }

        let current = inner.state.cluster_resource_state_version;
        if let Some(bound) = inner.staleness_bound {
            let behind = current.saturating_sub(req.last_seen_cluster_resource_state_version);
            if behind > bound {
                warn!(
                    reported = req.last_seen_cluster_resource_state_version,
                    current, behind, bound, "discarding report computed against stale snapshot"
                );
                return Err(AuthorityError::StaleSnapshot {
                    reported: req.last_seen_cluster_resource_state_version,
                    current,
                    bound,
                });
            }
        }

        let mut seen = HashSet::new();
        for instance in &req.instances {
            if instance.instance_id.is_empty() {
                return Err(AuthorityError::EmptyInstanceId);
            }
            if !seen.insert(instance.instance_id.as_str()) {
                return Err(AuthorityError::DuplicateInstanceId(
                    instance.instance_id.clone(),
                ));
            }
        }

        // All checks passed: apply the full replacement.
        let state = &mut inner.state;
        state.last_seen_autoscaler_state_version = req.autoscaler_state_version;
        state.last_report_snapshot_version = req.last_seen_cluster_resource_state_version;
        state.instances = req.instances;
        state.infeasible_requests = req.infeasible_resource_requests;
        state.infeasible_gang_requests = req.infeasible_gang_resource_requests;
        state.infeasible_constraints = req.infeasible_cluster_resource_constraints;

        info!(
            version = req.autoscaler_state_version,
            instances = state.instances.len(),
            infeasible = state.infeasible_requests.len(),
            "autoscaling state accepted"
        );

        Self::persist(&inner)?;
        Ok(ReportAutoscalingStateReply {})
    }

    /// The instance view from the last accepted report.
    pub fn reported_instances(&self) -> Vec<Instance> {
        self.inner.lock().state.instances.clone()
    }

    /// Demand the reporter flagged as unschedulable in its last report.
    pub fn infeasible_demand(
        &self,
    ) -> (
        Vec<ResourceRequest>,
        Vec<GangResourceRequest>,
        Vec<ClusterResourceConstraint>,
    ) {
        let inner = self.inner.lock();
        (
            inner.state.infeasible_requests.clone(),
            inner.state.infeasible_gang_requests.clone(),
            inner.state.infeasible_constraints.clone(),
        )
    }

    // ── Feed side: node state (external resource-tracking feed) ───

    /// Register a node observed inside the cluster.
    ///
    /// The node enters the pool at `node_state_version` 1 regardless of
    /// what the feed supplied.
    pub fn add_node(&self, mut node: NodeState) -> AuthorityResult<()> {
        if node.node_id.is_empty() {
            return Err(AuthorityError::EmptyNodeId);
        }
        if let Some(resource) = node.resource_invariant_violation() {
            return Err(AuthorityError::ResourceInvariant {
                node_id: node.node_id.clone(),
                resource: resource.to_string(),
            });
        }

        let mut inner = self.inner.lock();
        if inner.state.nodes.contains_key(&node.node_id) {
            return Err(AuthorityError::DuplicateNodeId(node.node_id));
        }

        node.node_state_version = 1;
        info!(node_id = %node.node_id, node_type = %node.node_type, "node registered");
        inner.state.nodes.insert(node.node_id.clone(), node);
        Self::bump_and_persist(&mut inner)
    }

    /// Update a node's available resources from the live feed.
    pub fn update_node_resources(
        &self,
        node_id: &str,
        available: ResourceMap,
    ) -> AuthorityResult<()> {
        self.mutate_node(node_id, |node| {
            let updated = NodeState {
                available_resources: available,
                ..node.clone()
            };
            if let Some(resource) = updated.resource_invariant_violation() {
                return Err(AuthorityError::ResourceInvariant {
                    node_id: node_id.to_string(),
                    resource: resource.to_string(),
                });
            }
            node.available_resources = updated.available_resources;
            Ok(())
        })
    }

    /// Replace a node's dynamic labels.
    pub fn update_node_labels(
        &self,
        node_id: &str,
        labels: HashMap<String, String>,
    ) -> AuthorityResult<()> {
        self.mutate_node(node_id, |node| {
            node.labels = labels;
            Ok(())
        })
    }

    /// Record an allocation the scheduler made against a node.
    ///
    /// Checks the request's placement constraints against the node's
    /// current labels, deducts the resources, and applies any
    /// schedule-time label writes — all under the one lock, so label
    /// creation is atomic with the allocation itself.
    pub fn record_allocation(
        &self,
        node_id: &str,
        request: &ResourceRequest,
    ) -> AuthorityResult<()> {
        self.mutate_node(node_id, |node| {
            for constraint in &request.constraints {
                if !constraint.is_satisfied_by(&node.labels) {
                    return Err(AuthorityError::ConstraintViolated(node_id.to_string()));
                }
            }
            if !resources_fit(&request.resources, &node.available_resources) {
                return Err(AuthorityError::ResourceInvariant {
                    node_id: node_id.to_string(),
                    resource: "allocation exceeds available".to_string(),
                });
            }
            for (name, qty) in &request.resources {
                if let Some(avail) = node.available_resources.get_mut(name) {
                    *avail -= qty;
                }
            }
            for constraint in &request.constraints {
                constraint.apply_on_schedule(&mut node.labels);
            }
            Ok(())
        })
    }

    /// Transition a node's status along the drain lifecycle edges.
    ///
    /// `Dead` removes the node from the pool promptly so its resources
    /// stop counting toward capacity.
    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) -> AuthorityResult<()> {
        let mut inner = self.inner.lock();
        let node = inner
            .state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| AuthorityError::UnknownNode(node_id.to_string()))?;

        node.status = node.status.transition_to(status)?;
        node.node_state_version += 1;

        if status == NodeStatus::Dead {
            warn!(%node_id, "node dead, removing from schedulable pool");
            inner.state.nodes.remove(node_id);
        } else {
            debug!(%node_id, ?status, "node status changed");
        }
        Self::bump_and_persist(&mut inner)
    }

    /// Remove a node outright (provisioning-layer teardown).
    pub fn remove_node(&self, node_id: &str) -> AuthorityResult<bool> {
        let mut inner = self.inner.lock();
        let existed = inner.state.nodes.remove(node_id).is_some();
        if existed {
            info!(%node_id, "node removed");
            Self::bump_and_persist(&mut inner)?;
        }
        Ok(existed)
    }

    /// Current node states, ordered by node id.
    pub fn nodes(&self) -> Vec<NodeState> {
        self.inner.lock().state.nodes.values().cloned().collect()
    }

    // ── Demand side ───────────────────────────────────────────────

    /// Add pending demand. Identical request shapes aggregate by count.
    pub fn add_resource_request(&self, request: ResourceRequest, count: u64) -> AuthorityResult<()> {
        let mut inner = self.inner.lock();
        match inner
            .state
            .pending_requests
            .iter_mut()
            .find(|entry| entry.request == request)
        {
            Some(entry) => entry.count += count,
            None => inner
                .state
                .pending_requests
                .push(ResourceRequestByCount { request, count }),
        }
        Self::bump_and_persist(&mut inner)
    }

    /// Mark `count` units of a pending request as satisfied. Returns
    /// false if no matching request was pending.
    pub fn complete_resource_request(
        &self,
        request: &ResourceRequest,
        count: u64,
    ) -> AuthorityResult<bool> {
        let mut inner = self.inner.lock();
        let Some(pos) = inner
            .state
            .pending_requests
            .iter()
            .position(|entry| entry.request == *request)
        else {
            return Ok(false);
        };

        let entry = &mut inner.state.pending_requests[pos];
        entry.count = entry.count.saturating_sub(count);
        if entry.count == 0 {
            inner.state.pending_requests.remove(pos);
        }
        Self::bump_and_persist(&mut inner)?;
        Ok(true)
    }

    /// Add a gang request. Stays pending until completed as a whole —
    /// partial allocation is forbidden.
    pub fn add_gang_resource_request(&self, gang: GangResourceRequest) -> AuthorityResult<()> {
        let mut inner = self.inner.lock();
        inner.state.pending_gang_requests.push(gang);
        Self::bump_and_persist(&mut inner)
    }

    /// Remove a gang request after all of its bundles were allocated
    /// atomically. Returns false if no matching gang was pending.
    pub fn complete_gang_resource_request(
        &self,
        gang: &GangResourceRequest,
    ) -> AuthorityResult<bool> {
        let mut inner = self.inner.lock();
        let Some(pos) = inner
            .state
            .pending_gang_requests
            .iter()
            .position(|entry| entry == gang)
        else {
            return Ok(false);
        };
        inner.state.pending_gang_requests.remove(pos);
        Self::bump_and_persist(&mut inner)?;
        Ok(true)
    }

    /// Install or replace the capacity floor attributed to a job.
    pub fn set_cluster_resource_constraint(
        &self,
        constraint: ClusterResourceConstraint,
    ) -> AuthorityResult<()> {
        let mut inner = self.inner.lock();
        inner
            .state
            .cluster_constraints
            .retain(|c| c.job_id != constraint.job_id);
        inner.state.cluster_constraints.push(constraint);
        Self::bump_and_persist(&mut inner)
    }

    /// Drop a job's capacity floor. Returns false if none was active.
    pub fn clear_cluster_resource_constraint(&self, job_id: &str) -> AuthorityResult<bool> {
        let mut inner = self.inner.lock();
        let before = inner.state.cluster_constraints.len();
        inner.state.cluster_constraints.retain(|c| c.job_id != job_id);
        if inner.state.cluster_constraints.len() == before {
            return Ok(false);
        }
        Self::bump_and_persist(&mut inner)?;
        Ok(true)
    }

    // ── Internals ─────────────────────────────────────────────────

    fn mutate_node(
        &self,
        node_id: &str,
        f: impl FnOnce(&mut NodeState) -> AuthorityResult<()>,
    ) -> AuthorityResult<()> {
        let mut inner = self.inner.lock();
        let node = inner
            .state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| AuthorityError::UnknownNode(node_id.to_string()))?;
        f(node)?;
        node.node_state_version += 1;
        Self::bump_and_persist(&mut inner)
    }

    fn bump_and_persist(inner: &mut Inner) -> AuthorityResult<()> {
        inner.state.cluster_resource_state_version += 1;
        Self::persist(inner)
    }

    fn persist(inner: &Inner) -> AuthorityResult<()> {
        if let Some(store) = &inner.store {
            store.save(&inner.state)?;
        }
        Ok(())
    }
}

impl Default for StateAuthority {
    fn default() -> Self {
        Self::new()
    }
}
