//! Shared harness: a meta service with an in-memory transport, plus a replica
//! stand-in that applies and acknowledges requests.

#![allow(dead_code)]

use minimeta::common::{ConfigUpdateRequest, Gpid, NodeId, PartitionConfig, Result};
use minimeta::meta::state_machine::apply_update;
use minimeta::meta::{
    AppInfo, DummyBalancer, InMemoryTransport, LoadBalancer, MemoryStore, MetaService, MetaStore,
    PartitionGuardian, ServerState,
};
use std::sync::Arc;

pub fn node(i: usize) -> NodeId {
    NodeId::new(format!("node-{}:34801", i))
}

pub fn app(app_id: i32, partition_count: i32, max_replica_count: usize) -> AppInfo {
    AppInfo {
        app_id,
        app_name: format!("app-{}", app_id),
        partition_count,
        max_replica_count,
    }
}

pub struct Cluster {
    pub service: Arc<MetaService>,
    pub transport: Arc<InMemoryTransport>,
    pub nodes: Vec<NodeId>,
}

impl Cluster {
    /// `nodes` alive nodes, no apps
    pub fn new(nodes: usize) -> Self {
        Self::with(Box::new(MemoryStore::new()), Box::new(DummyBalancer), nodes)
    }

    pub fn with(store: Box<dyn MetaStore>, balancer: Box<dyn LoadBalancer>, nodes: usize) -> Self {
        let state = ServerState::open(store, PartitionGuardian::default(), balancer).unwrap();
        let transport = Arc::new(InMemoryTransport::new());
        let service = Arc::new(MetaService::new(state, transport.clone()));
        let nodes: Vec<NodeId> = (0..nodes).map(node).collect();
        service.set_node_state(&nodes, true);
        Self {
            service,
            transport,
            nodes,
        }
    }

    /// Run one sweep and return what it sent
    pub fn sweep(&self) -> Vec<ConfigUpdateRequest> {
        self.service.check_all_partitions();
        self.transport
            .take_sent()
            .into_iter()
            .map(|(_, request)| request)
            .collect()
    }

    /// What a replica does with a request: apply it, then acknowledge
    pub fn ack(&self, mut request: ConfigUpdateRequest) -> Result<PartitionConfig> {
        apply_update(&mut request)?;
        self.service.on_update_configuration(request)
    }

    /// Sweep and acknowledge everything until a sweep sends nothing
    pub fn settle(&self) -> usize {
        let mut rounds = 0;
        loop {
            let requests = self.sweep();
            if requests.is_empty() {
                return rounds;
            }
            for request in requests {
                self.ack(request).unwrap();
            }
            rounds += 1;
            assert!(rounds < 100, "cluster does not settle");
        }
    }

    pub fn config(&self, gpid: Gpid) -> PartitionConfig {
        self.service.config(gpid).unwrap()
    }

    /// Overwrite a partition's membership and rebuild node states
    pub fn set_config(
        &self,
        gpid: Gpid,
        ballot: i64,
        primary: Option<&NodeId>,
        secondaries: &[&NodeId],
    ) {
        let mut meta = self.service.lock();
        let view = meta.view_mut();
        let pc = view.config_mut(gpid).unwrap();
        pc.ballot = ballot;
        pc.primary = primary.cloned();
        pc.secondaries = secondaries.iter().map(|n| (*n).clone()).collect();
        view.initialize_node_state();
    }
}
