//! The autoscaler state reporter.
//!
//! An external control loop that polls the authority for versioned
//! snapshots, classifies pending demand, garbage-collects failing
//! instances, and reports its full state back under a strictly
//! increasing version. On a lost race with another replica it adopts
//! the authority's recorded version as a floor from the next snapshot
//! and retries above it.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use gridscale_authority::{AuthorityError, StateAuthority};
use gridscale_model::{
    ClusterResourceStateSnapshot, GetClusterResourceStateRequest, InstanceId,
    ReportAutoscalingStateReply, ReportAutoscalingStateRequest,
};

use crate::error::SyncError;
use crate::feasibility::{NodeTypeSpec, classify};
use crate::instances::InstancePool;

/// The reporter's side of the synchronization protocol.
///
/// Both calls are plain request/response; callers apply their own
/// timeout and retry policy at the transport layer.
pub trait StateSyncClient: Send + Sync {
    fn get_cluster_resource_state(
        &self,
        req: GetClusterResourceStateRequest,
    ) -> impl Future<Output = Result<ClusterResourceStateSnapshot, SyncError>> + Send;

    fn report_autoscaling_state(
        &self,
        req: ReportAutoscalingStateRequest,
    ) -> impl Future<Output = Result<ReportAutoscalingStateReply, SyncError>> + Send;
}

/// In-process client for a co-located authority (standalone daemon,
/// tests).
#[derive(Clone)]
pub struct LocalSyncClient {
    authority: StateAuthority,
}

impl LocalSyncClient {
    pub fn new(authority: StateAuthority) -> Self {
        Self { authority }
    }
}

impl StateSyncClient for LocalSyncClient {
    async fn get_cluster_resource_state(
        &self,
        req: GetClusterResourceStateRequest,
    ) -> Result<ClusterResourceStateSnapshot, SyncError> {
        Ok(self.authority.get_cluster_resource_state(&req))
    }

    async fn report_autoscaling_state(
        &self,
        req: ReportAutoscalingStateRequest,
    ) -> Result<ReportAutoscalingStateReply, SyncError> {
        self.authority
            .report_autoscaling_state(req)
            .map_err(|e| match e {
                AuthorityError::StaleReport { submitted, stored } => {
                    SyncError::StaleReport { submitted, stored }
                }
                other => SyncError::Rejected(other.to_string()),
            })
    }
}

/// Outcome of one successful synchronization round.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Snapshot version the round's decisions were computed against.
    pub snapshot_version: u64,
    /// Autoscaler state version the authority accepted.
    pub reported_version: u64,
    /// Instances garbage-collected out of `Failing` this round.
    pub garbage_collected: Vec<InstanceId>,
}

/// The polling control loop.
pub struct Reporter<C: StateSyncClient> {
    client: C,
    pool: InstancePool,
    node_types: Vec<NodeTypeSpec>,
    /// Last version this reporter successfully submitted or observed
    /// as recorded by the authority.
    autoscaler_state_version: u64,
    last_seen_cluster_version: u64,
}

impl<C: StateSyncClient> Reporter<C> {
    pub fn new(client: C, node_types: Vec<NodeTypeSpec>) -> Self {
        Self {
            client,
            pool: InstancePool::new(),
            node_types,
            autoscaler_state_version: 0,
            last_seen_cluster_version: 0,
        }
    }

    pub fn with_pool(mut self, pool: InstancePool) -> Self {
        self.pool = pool;
        self
    }

    /// The provisioning backend drives lifecycle transitions through
    /// the pool.
    pub fn pool_mut(&mut self) -> &mut InstancePool {
        &mut self.pool
    }

    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    pub fn last_seen_cluster_version(&self) -> u64 {
        self.last_seen_cluster_version
    }

    /// One full synchronization round: fetch, classify, report.
    pub async fn sync_once(&mut self, now: u64) -> Result<SyncOutcome, SyncError> {
        let snapshot = self
            .client
            .get_cluster_resource_state(GetClusterResourceStateRequest {
                last_seen_cluster_resource_state_version: self.last_seen_cluster_version,
            })
            .await?;

        self.last_seen_cluster_version = snapshot.cluster_resource_state_version;

        // Another replica may have reported past us; its accepted
        // version is the floor for ours.
        if snapshot.last_seen_autoscaler_state_version > self.autoscaler_state_version {
            debug!(
                floor = snapshot.last_seen_autoscaler_state_version,
                ours = self.autoscaler_state_version,
                "adopting authority-recorded autoscaler version as floor"
            );
            self.autoscaler_state_version = snapshot.last_seen_autoscaler_state_version;
        }

        let garbage_collected = self.pool.collect_failing(now);
        let infeasible = classify(&snapshot, &self.node_types);

        let next_version = self.autoscaler_state_version + 1;
        let report = ReportAutoscalingStateRequest {
            last_seen_cluster_resource_state_version: snapshot.cluster_resource_state_version,
            autoscaler_state_version: next_version,
            instances: self.pool.snapshot(),
            infeasible_resource_requests: infeasible.requests,
            infeasible_gang_resource_requests: infeasible.gang_requests,
            infeasible_cluster_resource_constraints: infeasible.constraints,
        };

        match self.client.report_autoscaling_state(report).await {
            Ok(ReportAutoscalingStateReply {}) => {
                self.autoscaler_state_version = next_version;
                debug!(
                    version = next_version,
                    snapshot = snapshot.cluster_resource_state_version,
                    "state reported"
                );
                Ok(SyncOutcome {
                    snapshot_version: snapshot.cluster_resource_state_version,
                    reported_version: next_version,
                    garbage_collected,
                })
            }
            Err(SyncError::StaleReport { submitted, stored }) => {
                // Lost a race; re-fetch before retrying so we never
                // clobber the winner's decisions with a stale view.
                warn!(submitted, stored, "report lost version race, will resync");
                self.autoscaler_state_version = stored;
                Err(SyncError::StaleReport { submitted, stored })
            }
            Err(other) => Err(other),
        }
    }

    /// Run the polling loop until shutdown.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "reporter started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.sync_once(epoch_secs()).await {
                        Ok(outcome) => {
                            if !outcome.garbage_collected.is_empty() {
                                info!(
                                    collected = outcome.garbage_collected.len(),
                                    "failing instances collected"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "synchronization round failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("reporter shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
