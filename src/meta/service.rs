//! Meta service: the single lock around `ServerState` and the sweep loop

use crate::common::{
    ConfigUpdateRequest, Gpid, NodeId, PartitionConfig, ProposalAction, ReplicaInfo, Result,
};
use crate::meta::server_state::{ServerState, SweepReport};
use crate::meta::transport::Transport;
use crate::meta::view::AppInfo;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub struct MetaService {
    state: Mutex<ServerState>,
    transport: Arc<dyn Transport>,
}

impl MetaService {
    pub fn new(state: ServerState, transport: Arc<dyn Transport>) -> Self {
        Self {
            state: Mutex::new(state),
            transport,
        }
    }

    /// Direct access to the state, for status pages and tests
    pub fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one sweep and send its requests once the lock is released
    pub fn check_all_partitions(&self) -> SweepReport {
        let report = self.lock().check_all_partitions();
        for request in &report.requests {
            self.transport.send(&request.target, request.clone());
        }
        report
    }

    pub fn on_update_configuration(&self, request: ConfigUpdateRequest) -> Result<PartitionConfig> {
        self.lock().on_update_configuration(request)
    }

    pub fn set_node_state(&self, nodes: &[NodeId], alive: bool) -> usize {
        self.lock().set_node_state(nodes, alive)
    }

    pub fn on_replica_report(&self, node: &NodeId, reports: &[ReplicaInfo]) -> usize {
        self.lock().on_replica_report(node, reports)
    }

    pub fn assign_proposals(&self, gpid: Gpid, actions: Vec<ProposalAction>) -> Result<()> {
        self.lock().assign_proposals(gpid, actions)
    }

    pub fn create_app(&self, info: AppInfo) -> Result<()> {
        self.lock().create_app(info)
    }

    pub fn set_max_replica_count(&self, app_id: i32, max_replica_count: usize) -> Result<AppInfo> {
        self.lock().set_max_replica_count(app_id, max_replica_count)
    }

    pub fn config(&self, gpid: Gpid) -> Option<PartitionConfig> {
        self.lock().view().config(gpid).cloned()
    }
}

/// Sweep every `interval`. A slow sweep delays the next tick instead of
/// letting sweeps pile up.
pub fn start_sweep_task(service: Arc<MetaService>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            service.check_all_partitions();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::balancer::DummyBalancer;
    use crate::meta::guardian::PartitionGuardian;
    use crate::meta::store::MemoryStore;
    use crate::meta::transport::InMemoryTransport;

    fn service(transport: Arc<InMemoryTransport>) -> Arc<MetaService> {
        let state = ServerState::open(
            Box::new(MemoryStore::new()),
            PartitionGuardian::default(),
            Box::new(DummyBalancer),
        )
        .unwrap();
        Arc::new(MetaService::new(state, transport))
    }

    #[test]
    fn test_sweep_sends_through_transport() {
        let transport = Arc::new(InMemoryTransport::new());
        let service = service(transport.clone());
        service
            .create_app(AppInfo {
                app_id: 1,
                app_name: "test".into(),
                partition_count: 3,
                max_replica_count: 3,
            })
            .unwrap();
        service.set_node_state(&[NodeId::from("node-0"), NodeId::from("node-1")], true);

        let report = service.check_all_partitions();
        assert_eq!(report.needs_repair, 3);
        let sent = transport.take_sent();
        assert_eq!(sent.len(), 3);
        for (target, request) in sent {
            assert_eq!(target, request.target);
        }
    }

    #[tokio::test]
    async fn test_sweep_task_runs() {
        let transport = Arc::new(InMemoryTransport::new());
        let service = service(transport.clone());
        service
            .create_app(AppInfo {
                app_id: 1,
                app_name: "test".into(),
                partition_count: 1,
                max_replica_count: 3,
            })
            .unwrap();
        service.set_node_state(&[NodeId::from("node-0")], true);

        let handle = start_sweep_task(service.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        // nothing acknowledges, so every sweep re-issues the same request
        let sent = transport.take_sent();
        assert!(sent.len() >= 2);
        assert!(sent.windows(2).all(|w| w[0] == w[1]));
    }
}
