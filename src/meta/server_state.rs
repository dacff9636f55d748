//! Server state: the cluster view plus everything that mutates it
//!
//! All entry points take `&mut self`; `MetaService` serializes them behind one
//! lock. Every accepted configuration is written to the store before it is
//! installed in the view.

use crate::common::{
    ConfigType, ConfigUpdateRequest, Error, Gpid, NodeId, PartitionConfig, ProposalAction,
    ReplicaInfo, Result, METRICS,
};
use crate::meta::balancer::LoadBalancer;
use crate::meta::guardian::{installed_config, PartitionGuardian, PartitionHealth};
use crate::meta::state_machine::apply_update;
use crate::meta::store::MetaStore;
use crate::meta::view::{AppInfo, AppState, ClusterView};
use serde::Serialize;
use std::time::Instant;

/// Upper bound on partitions per app
pub const MAX_PARTITION_COUNT: i32 = 65536;
/// Upper bound on replicas per partition
pub const MAX_REPLICA_COUNT: usize = 32;

fn check_partition_count(partition_count: i32) -> Result<()> {
    if partition_count <= 0 || partition_count > MAX_PARTITION_COUNT {
        return Err(Error::InvalidConfig(format!(
            "partition count must be in 1..={}, got {}",
            MAX_PARTITION_COUNT, partition_count
        )));
    }
    Ok(())
}

fn check_replica_count(max_replica_count: usize) -> Result<()> {
    if max_replica_count == 0 || max_replica_count > MAX_REPLICA_COUNT {
        return Err(Error::InvalidConfig(format!(
            "max replica count must be in 1..={}, got {}",
            MAX_REPLICA_COUNT, max_replica_count
        )));
    }
    Ok(())
}

/// Outcome of one pass over every partition
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub healthy: usize,
    pub needs_repair: usize,
    pub unrecoverable: usize,
    /// Requests to hand to the transport, one per partition at most
    pub requests: Vec<ConfigUpdateRequest>,
    /// Proposals queued by the balancer after an all-healthy sweep
    pub balancer_proposals: usize,
}

impl SweepReport {
    pub fn all_healthy(&self) -> bool {
        self.needs_repair == 0 && self.unrecoverable == 0
    }
}

pub struct ServerState {
    view: ClusterView,
    guardian: PartitionGuardian,
    balancer: Box<dyn LoadBalancer>,
    store: Box<dyn MetaStore>,
}

impl ServerState {
    /// Restore apps from `store`. Every node starts dead until the failure
    /// detector reports it.
    pub fn open(
        store: Box<dyn MetaStore>,
        guardian: PartitionGuardian,
        balancer: Box<dyn LoadBalancer>,
    ) -> Result<Self> {
        let mut view = ClusterView::new();
        let saved = store.load()?;
        let apps = saved.len();
        for (info, partitions) in saved {
            if check_partition_count(info.partition_count).is_err()
                || check_replica_count(info.max_replica_count).is_err()
            {
                return Err(Error::MetadataCorrupted(format!(
                    "app {} has partition count {} and max replica count {}",
                    info.app_id, info.partition_count, info.max_replica_count
                )));
            }
            view.add_app(AppState::restore(info, partitions))?;
        }
        view.initialize_node_state();

        tracing::info!(
            "Restored {} apps, balancer: {}",
            apps,
            balancer.name()
        );
        Ok(Self {
            view,
            guardian,
            balancer,
            store,
        })
    }

    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ClusterView {
        &mut self.view
    }

    pub fn guardian(&self) -> &PartitionGuardian {
        &self.guardian
    }

    pub fn create_app(&mut self, info: AppInfo) -> Result<()> {
        check_partition_count(info.partition_count)?;
        check_replica_count(info.max_replica_count)?;
        if self.view.app(info.app_id).is_some() {
            return Err(Error::AppExists(info.app_id));
        }

        let app = AppState::new(info.clone());
        self.store.put_app(&info)?;
        for pc in &app.partitions {
            self.store.put_partition(pc)?;
        }
        self.view.add_app(app)?;

        tracing::info!(
            "Created app {} ({}): {} partitions x {} replicas",
            info.app_id,
            info.app_name,
            info.partition_count,
            info.max_replica_count
        );
        Ok(())
    }

    /// Change the replication factor; the next sweeps add or remove secondaries
    pub fn set_max_replica_count(&mut self, app_id: i32, max_replica_count: usize) -> Result<AppInfo> {
        check_replica_count(max_replica_count)?;
        let app = self
            .view
            .app_mut(app_id)
            .ok_or(Error::AppNotFound(app_id))?;
        app.set_max_replica_count(max_replica_count);

        self.store.put_app(&app.info)?;
        for pc in &app.partitions {
            self.store.put_partition(pc)?;
        }
        tracing::info!("App {} max replica count set to {}", app_id, max_replica_count);
        Ok(app.info.clone())
    }

    /// Cure every partition once and collect the resulting requests
    pub fn check_all_partitions(&mut self) -> SweepReport {
        let start = Instant::now();
        let mut report = SweepReport::default();

        // unacknowledged requests of the previous sweep are re-decided
        self.view.clear_pending();
        for gpid in self.view.gpids() {
            let (health, action) = self.guardian.cure(&mut self.view, gpid);
            match health {
                PartitionHealth::Healthy => report.healthy += 1,
                PartitionHealth::NeedsRepair => report.needs_repair += 1,
                PartitionHealth::UnrecoverableForNow => report.unrecoverable += 1,
            }
            let Some(action) = action else {
                continue;
            };
            if let Some(pc) = self.view.config(gpid) {
                report
                    .requests
                    .push(ConfigUpdateRequest::from_action(&action, pc));
                self.view.add_pending(gpid, &action);
            }
        }

        if report.all_healthy() {
            for (gpid, actions) in self.balancer.balance(&self.view) {
                match self.view.context_mut(gpid) {
                    Some(cc) => {
                        report.balancer_proposals += actions.len();
                        cc.proposals.assign(actions);
                    }
                    None => tracing::warn!("Balancer proposed for unknown partition {}", gpid),
                }
            }
        }

        METRICS.partitions_healthy.set(report.healthy as u64);
        METRICS.partitions_needs_repair.set(report.needs_repair as u64);
        METRICS
            .partitions_unrecoverable
            .set(report.unrecoverable as u64);
        METRICS.record_sweep(start.elapsed());

        if report.all_healthy() && report.requests.is_empty() {
            tracing::debug!("Sweep: {} partitions healthy", report.healthy);
        } else {
            tracing::info!(
                "Sweep: {} healthy, {} need repair, {} unrecoverable, {} requests",
                report.healthy,
                report.needs_repair,
                report.unrecoverable,
                report.requests.len()
            );
        }
        report
    }

    /// Install an update acknowledged by a replica.
    ///
    /// The ballot must be exactly one above the current one and the action
    /// must be valid on the current configuration; membership is recomputed
    /// here, only the decree is taken from the replica.
    pub fn on_update_configuration(&mut self, mut request: ConfigUpdateRequest) -> Result<PartitionConfig> {
        let pid = request.pid();
        let current = self
            .view
            .config(pid)
            .ok_or(Error::PartitionNotFound(pid))?;

        let expected = current.ballot + 1;
        if request.config.ballot != expected {
            METRICS.updates_rejected.inc();
            tracing::warn!(
                "{}: stale {}({}) with ballot {}, current {}",
                pid,
                request.kind,
                request.node,
                request.config.ballot,
                current.ballot
            );
            return Err(Error::StaleBallot {
                pid,
                expected,
                actual: request.config.ballot,
            });
        }

        let mut checked = current.clone();
        if let Err(e) = checked.apply_action(request.kind, &request.node) {
            METRICS.updates_rejected.inc();
            tracing::warn!("{}: rejected acknowledged update: {}", pid, e);
            return Err(e);
        }
        request.config.primary = checked.primary;
        request.config.secondaries = checked.secondaries;

        self.install(request)
    }

    fn install(&mut self, request: ConfigUpdateRequest) -> Result<PartitionConfig> {
        let pid = request.pid();
        let current = self
            .view
            .config(pid)
            .ok_or(Error::PartitionNotFound(pid))?;
        let installed = installed_config(current, &request);

        self.store.put_partition(&installed)?;
        self.guardian.reconfig(&mut self.view, &request);
        METRICS.updates_applied.inc();
        Ok(installed)
    }

    /// Failure detector input. A node that goes dead is downgraded out of
    /// every partition it serves. Returns the number of downgrades.
    pub fn set_node_state(&mut self, nodes: &[NodeId], alive: bool) -> usize {
        let mut downgrades = 0;
        for node in nodes {
            let ns = self.view.node_mut(node);
            if ns.is_alive() != alive {
                tracing::info!("Node {} is now {}", node, if alive { "alive" } else { "dead" });
            }
            ns.set_alive(alive);
            if alive {
                continue;
            }

            for gpid in ns.partitions() {
                match self.downgrade(node, gpid) {
                    Ok(_) => {
                        downgrades += 1;
                        METRICS.node_downgrades.inc();
                    }
                    Err(e) => tracing::warn!("{}: failed to downgrade dead {}: {}", gpid, node, e),
                }
            }
        }
        downgrades
    }

    fn downgrade(&mut self, node: &NodeId, gpid: Gpid) -> Result<PartitionConfig> {
        let pc = self
            .view
            .config(gpid)
            .ok_or(Error::PartitionNotFound(gpid))?;
        let action = ProposalAction::new(node.clone(), node.clone(), ConfigType::DowngradeToInactive);
        let mut request = ConfigUpdateRequest::from_action(&action, pc);
        apply_update(&mut request)?;
        self.install(request)
    }

    /// Store replica reports from `node`. Returns how many named an unknown
    /// partition.
    pub fn on_replica_report(&mut self, node: &NodeId, reports: &[ReplicaInfo]) -> usize {
        let mut unknown = 0;
        for info in reports {
            if !self.view.collect_replica(node, info) {
                tracing::debug!("{} reported unknown partition {}", node, info.pid);
                unknown += 1;
            }
        }

        let ns = self.view.node_mut(node);
        if ns.is_alive() {
            ns.set_replicas_collected(true);
        }
        unknown
    }

    /// Replace the proposal queue of a partition
    pub fn assign_proposals(&mut self, gpid: Gpid, actions: Vec<ProposalAction>) -> Result<()> {
        let cc = self
            .view
            .context_mut(gpid)
            .ok_or(Error::PartitionNotFound(gpid))?;
        tracing::info!("{}: {} proposals queued", gpid, actions.len());
        cc.proposals.assign(actions);
        Ok(())
    }
}
