//! Reporter-side instance pool.
//!
//! The pool owns the provisioning-layer `Instance` entries and is the
//! only place they are mutated. Every status change goes through the
//! instance lifecycle machine, so invalid edges are rejected before
//! they can reach a report. `Failing` instances that cannot
//! re-establish contact are garbage-collected to `Stopped` after a
//! finite timeout to bound leaked accounting.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use gridscale_model::{Instance, InstanceId, InstanceStatus, ResourceMap};

use crate::error::{ReporterError, ReporterResult};

const DEFAULT_FAILING_TIMEOUT: Duration = Duration::from_secs(600);

/// Owns and mutates the reporter's view of provisioned instances.
pub struct InstancePool {
    instances: BTreeMap<InstanceId, Instance>,
    /// How long an instance may sit in `Failing` before collection.
    failing_timeout: Duration,
}

impl InstancePool {
    pub fn new() -> Self {
        Self {
            instances: BTreeMap::new(),
            failing_timeout: DEFAULT_FAILING_TIMEOUT,
        }
    }

    /// Set the garbage-collection timeout for `Failing` instances.
    pub fn with_failing_timeout(mut self, timeout: Duration) -> Self {
        self.failing_timeout = timeout;
        self
    }

    /// Track a newly provisioned instance; it enters `Starting`.
    pub fn launch(
        &mut self,
        instance_id: &str,
        node_type: &str,
        total_resources: ResourceMap,
        now: u64,
    ) -> ReporterResult<()> {
        if instance_id.is_empty() {
            return Err(ReporterError::EmptyInstanceId);
        }
        if self.instances.contains_key(instance_id) {
            return Err(ReporterError::DuplicateInstanceId(instance_id.to_string()));
        }

        self.instances.insert(
            instance_id.to_string(),
            Instance {
                instance_id: instance_id.to_string(),
                node_type: node_type.to_string(),
                status: InstanceStatus::Starting,
                total_resources,
                status_changed_at: now,
            },
        );
        debug!(%instance_id, %node_type, "instance launched");
        Ok(())
    }

    /// Move an instance along one lifecycle edge.
    pub fn transition(
        &mut self,
        instance_id: &str,
        next: InstanceStatus,
        now: u64,
    ) -> ReporterResult<()> {
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ReporterError::UnknownInstance(instance_id.to_string()))?;

        instance.status = instance.status.transition_to(next)?;
        instance.status_changed_at = now;
        debug!(%instance_id, status = ?next, "instance status changed");
        Ok(())
    }

    /// Propose draining an idle instance; an external decision-maker
    /// must approve or reject before anything stops.
    pub fn request_drain(&mut self, instance_id: &str, now: u64) -> ReporterResult<()> {
        self.transition(instance_id, InstanceStatus::DrainConfirmationPending, now)
    }

    /// Approve a proposed drain.
    pub fn approve_drain(&mut self, instance_id: &str, now: u64) -> ReporterResult<()> {
        self.transition(instance_id, InstanceStatus::DrainRequest, now)
    }

    /// Reject a proposed drain, returning the instance to `Idle` or
    /// `Running`.
    pub fn reject_drain(
        &mut self,
        instance_id: &str,
        resume_as: InstanceStatus,
        now: u64,
    ) -> ReporterResult<()> {
        self.transition(instance_id, resume_as, now)
    }

    /// Preempt an instance unconditionally. Downstream must honor it
    /// and proceed to `Stopping` regardless of drainability.
    pub fn preempt(&mut self, instance_id: &str, now: u64) -> ReporterResult<()> {
        self.transition(instance_id, InstanceStatus::PreemptRequest, now)
    }

    /// Garbage-collect instances stuck in `Failing` past the timeout.
    ///
    /// Returns the ids moved to `Stopped`.
    pub fn collect_failing(&mut self, now: u64) -> Vec<InstanceId> {
        let timeout = self.failing_timeout.as_secs();
        let mut collected = Vec::new();

        for instance in self.instances.values_mut() {
            if instance.status == InstanceStatus::Failing
                && now.saturating_sub(instance.status_changed_at) >= timeout
            {
                instance.status = InstanceStatus::Stopped;
                instance.status_changed_at = now;
                warn!(instance_id = %instance.instance_id, "failing instance garbage-collected");
                collected.push(instance.instance_id.clone());
            }
        }

        collected
    }

    /// Drop `Stopped` instances from the pool. Returns how many left.
    pub fn prune_stopped(&mut self) -> usize {
        let before = self.instances.len();
        self.instances
            .retain(|_, i| i.status != InstanceStatus::Stopped);
        before - self.instances.len()
    }

    pub fn get(&self, instance_id: &str) -> Option<&Instance> {
        self.instances.get(instance_id)
    }

    /// The complete current view, ordered by instance id. Reports
    /// carry this as a full replacement, never a delta.
    pub fn snapshot(&self) -> Vec<Instance> {
        self.instances.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for InstancePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::InstanceStatus as I;

    fn res(cpu: f64) -> ResourceMap {
        ResourceMap::from([("CPU".to_string(), cpu)])
    }

    fn pool_with_running(id: &str) -> InstancePool {
        let mut pool = InstancePool::new();
        pool.launch(id, "standard", res(4.0), 100).unwrap();
        pool.transition(id, I::Running, 110).unwrap();
        pool
    }

    #[test]
    fn launch_enters_starting() {
        let mut pool = InstancePool::new();
        pool.launch("i1", "standard", res(4.0), 100).unwrap();

        let i = pool.get("i1").unwrap();
        assert_eq!(i.status, I::Starting);
        assert_eq!(i.status_changed_at, 100);
    }

    #[test]
    fn launch_rejects_empty_and_duplicate_ids() {
        let mut pool = InstancePool::new();
        assert!(matches!(
            pool.launch("", "standard", res(1.0), 0).unwrap_err(),
            ReporterError::EmptyInstanceId
        ));

        pool.launch("i1", "standard", res(1.0), 0).unwrap();
        assert!(matches!(
            pool.launch("i1", "standard", res(1.0), 0).unwrap_err(),
            ReporterError::DuplicateInstanceId(id) if id == "i1"
        ));
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut pool = InstancePool::new();
        pool.launch("i1", "standard", res(1.0), 0).unwrap();

        // STARTING → IDLE skips RUNNING.
        let err = pool.transition("i1", I::Idle, 10).unwrap_err();
        assert!(matches!(err, ReporterError::Transition(_)));
        assert_eq!(pool.get("i1").unwrap().status, I::Starting);
    }

    #[test]
    fn drain_confirmation_round_trip() {
        let mut pool = pool_with_running("i1");
        pool.transition("i1", I::Idle, 120).unwrap();

        pool.request_drain("i1", 130).unwrap();
        assert_eq!(pool.get("i1").unwrap().status, I::DrainConfirmationPending);

        // Rejected: back to running.
        pool.reject_drain("i1", I::Running, 140).unwrap();
        assert_eq!(pool.get("i1").unwrap().status, I::Running);

        // Proposed again and approved this time.
        pool.transition("i1", I::Idle, 150).unwrap();
        pool.request_drain("i1", 160).unwrap();
        pool.approve_drain("i1", 170).unwrap();
        pool.transition("i1", I::Stopping, 180).unwrap();
        pool.transition("i1", I::Stopped, 190).unwrap();
    }

    #[test]
    fn drain_requires_idleness() {
        let mut pool = pool_with_running("i1");
        let err = pool.request_drain("i1", 120).unwrap_err();
        assert!(matches!(err, ReporterError::Transition(_)));
    }

    #[test]
    fn preempt_from_running_and_idle() {
        let mut pool = pool_with_running("i1");
        pool.preempt("i1", 120).unwrap();
        assert_eq!(pool.get("i1").unwrap().status, I::PreemptRequest);
        pool.transition("i1", I::Stopping, 130).unwrap();

        let mut pool = pool_with_running("i2");
        pool.transition("i2", I::Idle, 120).unwrap();
        pool.preempt("i2", 130).unwrap();
        assert_eq!(pool.get("i2").unwrap().status, I::PreemptRequest);
    }

    #[test]
    fn failing_collected_after_timeout() {
        let mut pool = pool_with_running("i1");
        pool.transition("i1", I::Failing, 200).unwrap();

        // Not yet past the timeout.
        assert!(pool.collect_failing(200 + 599).is_empty());
        assert_eq!(pool.get("i1").unwrap().status, I::Failing);

        let collected = pool.collect_failing(200 + 600);
        assert_eq!(collected, vec!["i1".to_string()]);
        assert_eq!(pool.get("i1").unwrap().status, I::Stopped);
    }

    #[test]
    fn failing_recovery_resets_the_clock() {
        let mut pool = pool_with_running("i1");
        pool.transition("i1", I::Failing, 200).unwrap();
        pool.transition("i1", I::Running, 300).unwrap();
        pool.transition("i1", I::Failing, 400).unwrap();

        // Timeout counts from the most recent failure.
        assert!(pool.collect_failing(900).is_empty());
        assert_eq!(pool.collect_failing(1000), vec!["i1".to_string()]);
    }

    #[test]
    fn prune_drops_stopped_only() {
        let mut pool = pool_with_running("i1");
        pool.launch("i2", "standard", res(1.0), 100).unwrap();
        pool.transition("i1", I::Idle, 105).unwrap();
        pool.transition("i1", I::Stopping, 110).unwrap();
        pool.transition("i1", I::Stopped, 120).unwrap();

        assert_eq!(pool.prune_stopped(), 1);
        assert!(pool.get("i1").is_none());
        assert!(pool.get("i2").is_some());
    }

    #[test]
    fn snapshot_is_ordered_and_complete() {
        let mut pool = InstancePool::new();
        pool.launch("i2", "standard", res(1.0), 0).unwrap();
        pool.launch("i1", "standard", res(1.0), 0).unwrap();

        let snap = pool.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].instance_id, "i1");
        assert_eq!(snap[1].instance_id, "i2");
    }
}
