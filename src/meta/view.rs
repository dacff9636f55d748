//! Cluster view: apps, partitions and node states
//!
//! One `ClusterView` is owned by the server state and handed by reference to
//! every guardian call. Node maps are ordered by `NodeId`, so every pick that
//! walks them is deterministic.

use crate::common::{
    Ballot, ConfigType, Decree, Gpid, NodeId, PartitionConfig, ProposalAction, ReplicaInfo, Result,
    INVALID_BALLOT, INVALID_DECREE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Drop time of a record that came from a replica report rather than a removal
pub const INVALID_TIMESTAMP: u64 = 0;

/// Last known state of a replica that is no longer a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedReplica {
    pub node: NodeId,
    /// Unix millis of the removal, or `INVALID_TIMESTAMP`
    pub time: u64,
    pub ballot: Ballot,
    pub last_committed_decree: Decree,
    pub last_prepared_decree: Decree,
}

impl DroppedReplica {
    pub fn new(
        node: NodeId,
        time: u64,
        ballot: Ballot,
        last_committed_decree: Decree,
        last_prepared_decree: Decree,
    ) -> Self {
        Self {
            node,
            time,
            ballot,
            last_committed_decree,
            last_prepared_decree,
        }
    }

    /// Record written at removal time, before the node reported anything
    pub fn dropped_at(node: NodeId, time: u64) -> Self {
        Self::new(node, time, INVALID_BALLOT, INVALID_DECREE, INVALID_DECREE)
    }

    pub fn has_data(&self) -> bool {
        self.ballot != INVALID_BALLOT || self.last_committed_decree != INVALID_DECREE
    }

    fn order_key(&self) -> (u64, Ballot, Decree, Decree) {
        (
            self.time,
            self.ballot,
            self.last_committed_decree,
            self.last_prepared_decree,
        )
    }
}

/// Fixed-capacity drop history, one entry per node, least informative first.
///
/// Records are ordered by drop time, then ballot and decrees; reported records
/// (`INVALID_TIMESTAMP`) sort before timed ones. When full, the front is evicted.
#[derive(Debug, Clone)]
pub struct DroppedTable {
    capacity: usize,
    entries: Vec<DroppedReplica>,
}

impl DroppedTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    pub fn find(&self, node: &NodeId) -> Option<&DroppedReplica> {
        self.entries.iter().find(|r| &r.node == node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DroppedReplica> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.check_size();
    }

    /// Overwrite the node's record with a fresh removal
    pub fn record_drop(&mut self, node: &NodeId, time: u64) {
        self.remove(node);
        self.insert_sorted(DroppedReplica::dropped_at(node.clone(), time));
        self.check_size();
    }

    /// Fold a replica report into the node's record, keeping a known drop time.
    ///
    /// Returns false if the record was evicted right away.
    pub fn collect(&mut self, node: &NodeId, info: &ReplicaInfo) -> bool {
        let time = self
            .find(node)
            .map(|r| r.time)
            .unwrap_or(INVALID_TIMESTAMP);
        self.remove(node);
        self.insert_sorted(DroppedReplica::new(
            node.clone(),
            time,
            info.ballot,
            info.last_committed_decree,
            info.last_prepared_decree,
        ));
        self.check_size();
        self.find(node).is_some()
    }

    pub fn remove(&mut self, node: &NodeId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| &r.node != node);
        before != self.entries.len()
    }

    /// Replace the whole table; later duplicates win
    pub fn assign(&mut self, records: Vec<DroppedReplica>) {
        self.entries.clear();
        for record in records {
            self.remove(&record.node);
            self.insert_sorted(record);
        }
        self.check_size();
    }

    fn insert_sorted(&mut self, record: DroppedReplica) {
        let key = record.order_key();
        let pos = self.entries.partition_point(|r| r.order_key() <= key);
        self.entries.insert(pos, record);
    }

    fn check_size(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
    }
}

/// Proposals queued for one partition by an external balancer
#[derive(Debug, Clone, Default)]
pub struct ProposalQueue {
    actions: VecDeque<ProposalAction>,
}

impl ProposalQueue {
    /// Replace whatever is queued
    pub fn assign(&mut self, actions: Vec<ProposalAction>) {
        self.actions = actions.into();
    }

    pub fn push(&mut self, action: ProposalAction) {
        self.actions.push_back(action);
    }

    pub fn front(&self) -> Option<&ProposalAction> {
        self.actions.front()
    }

    pub fn pop_front(&mut self) -> Option<ProposalAction> {
        self.actions.pop_front()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Meta-side bookkeeping attached to a partition
#[derive(Debug, Clone)]
pub struct ConfigContext {
    pub dropped: DroppedTable,
    pub proposals: ProposalQueue,
}

impl ConfigContext {
    pub fn new(max_replica_count: usize) -> Self {
        Self {
            dropped: DroppedTable::new(max_replica_count),
            proposals: ProposalQueue::default(),
        }
    }
}

/// Liveness and role assignments of one replica node
#[derive(Debug, Clone)]
pub struct NodeState {
    node: NodeId,
    alive: bool,
    replicas_collected: bool,
    primaries: BTreeSet<Gpid>,
    secondaries: BTreeSet<Gpid>,
    /// Roles proposed to this node in the current sweep and not yet
    /// acknowledged, true for primary
    pending: BTreeMap<Gpid, bool>,
    reports: HashMap<Gpid, ReplicaInfo>,
}

impl NodeState {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            alive: false,
            replicas_collected: false,
            primaries: BTreeSet::new(),
            secondaries: BTreeSet::new(),
            pending: BTreeMap::new(),
            reports: HashMap::new(),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// A liveness flip invalidates what was collected from the node
    pub fn set_alive(&mut self, alive: bool) {
        if self.alive != alive {
            self.replicas_collected = false;
        }
        self.alive = alive;
    }

    pub fn replicas_collected(&self) -> bool {
        self.replicas_collected
    }

    pub fn set_replicas_collected(&mut self, collected: bool) {
        self.replicas_collected = collected;
    }

    pub fn primary_count(&self) -> usize {
        self.primaries.len()
    }

    pub fn secondary_count(&self) -> usize {
        self.secondaries.len()
    }

    /// Primaries plus secondaries
    pub fn partition_count(&self) -> usize {
        self.primaries.len() + self.secondaries.len()
    }

    /// Primaries counting the ones proposed but not yet acknowledged
    pub fn primary_load(&self) -> usize {
        let pending = self
            .pending
            .iter()
            .filter(|(gpid, is_primary)| **is_primary && !self.primaries.contains(gpid))
            .count();
        self.primaries.len() + pending
    }

    /// Replicas counting the ones proposed but not yet acknowledged
    pub fn partition_load(&self) -> usize {
        let pending = self.pending.keys().filter(|gpid| !self.serves(gpid)).count();
        self.partition_count() + pending
    }

    pub fn add_pending(&mut self, gpid: Gpid, is_primary: bool) {
        self.pending.insert(gpid, is_primary);
    }

    pub fn remove_pending(&mut self, gpid: &Gpid) -> bool {
        self.pending.remove(gpid).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Gpid> {
        self.primaries.iter()
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &Gpid> {
        self.secondaries.iter()
    }

    pub fn partitions(&self) -> Vec<Gpid> {
        self.primaries
            .iter()
            .chain(self.secondaries.iter())
            .copied()
            .collect()
    }

    pub fn serves(&self, gpid: &Gpid) -> bool {
        self.primaries.contains(gpid) || self.secondaries.contains(gpid)
    }

    pub fn put_partition(&mut self, gpid: Gpid, is_primary: bool) {
        if is_primary {
            self.secondaries.remove(&gpid);
            self.primaries.insert(gpid);
        } else {
            self.primaries.remove(&gpid);
            self.secondaries.insert(gpid);
        }
    }

    pub fn remove_partition(&mut self, gpid: &Gpid) -> bool {
        self.primaries.remove(gpid) | self.secondaries.remove(gpid)
    }

    pub fn latest_report(&self, gpid: &Gpid) -> Option<&ReplicaInfo> {
        self.reports.get(gpid)
    }

    pub fn record_report(&mut self, info: ReplicaInfo) {
        self.reports.insert(info.pid, info);
    }

    fn clear_partitions(&mut self) {
        self.primaries.clear();
        self.secondaries.clear();
        self.pending.clear();
    }
}

/// Static description of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: i32,
    pub app_name: String,
    pub partition_count: i32,
    pub max_replica_count: usize,
}

/// A table with its partition configurations and contexts
#[derive(Debug, Clone)]
pub struct AppState {
    pub info: AppInfo,
    pub partitions: Vec<PartitionConfig>,
    pub contexts: Vec<ConfigContext>,
}

impl AppState {
    pub fn new(info: AppInfo) -> Self {
        Self::restore(info, Vec::new())
    }

    /// Rebuild an app from persisted configurations; missing partitions start empty
    pub fn restore(info: AppInfo, saved: Vec<PartitionConfig>) -> Self {
        assert!(
            info.partition_count > 0,
            "app {} has partition count {}",
            info.app_id,
            info.partition_count
        );
        assert!(
            info.max_replica_count > 0,
            "app {} has max replica count 0",
            info.app_id
        );

        let mut partitions: Vec<PartitionConfig> = (0..info.partition_count)
            .map(|i| PartitionConfig::new(Gpid::new(info.app_id, i), info.max_replica_count))
            .collect();
        for pc in saved {
            if pc.pid.app_id != info.app_id {
                continue;
            }
            if let Some(slot) = usize::try_from(pc.pid.partition_index)
                .ok()
                .and_then(|i| partitions.get_mut(i))
            {
                *slot = pc;
            }
        }
        let contexts = (0..info.partition_count)
            .map(|_| ConfigContext::new(info.max_replica_count))
            .collect();

        Self {
            info,
            partitions,
            contexts,
        }
    }

    pub fn app_id(&self) -> i32 {
        self.info.app_id
    }

    pub fn set_max_replica_count(&mut self, max_replica_count: usize) {
        assert!(max_replica_count > 0, "max replica count must be positive");
        self.info.max_replica_count = max_replica_count;
        for pc in &mut self.partitions {
            pc.max_replica_count = max_replica_count;
        }
        for cc in &mut self.contexts {
            cc.dropped.set_capacity(max_replica_count);
        }
    }
}

/// All apps and all node states
#[derive(Debug, Default)]
pub struct ClusterView {
    apps: BTreeMap<i32, AppState>,
    nodes: BTreeMap<NodeId, NodeState>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_app(&mut self, app: AppState) -> Result<()> {
        let app_id = app.app_id();
        if self.apps.contains_key(&app_id) {
            return Err(crate::Error::AppExists(app_id));
        }
        self.apps.insert(app_id, app);
        Ok(())
    }

    pub fn app(&self, app_id: i32) -> Option<&AppState> {
        self.apps.get(&app_id)
    }

    pub fn app_mut(&mut self, app_id: i32) -> Option<&mut AppState> {
        self.apps.get_mut(&app_id)
    }

    pub fn apps(&self) -> impl Iterator<Item = &AppState> {
        self.apps.values()
    }

    /// Every partition of every app, in app then index order
    pub fn gpids(&self) -> Vec<Gpid> {
        self.apps
            .values()
            .flat_map(|app| app.partitions.iter().map(|pc| pc.pid))
            .collect()
    }

    pub fn config(&self, gpid: Gpid) -> Option<&PartitionConfig> {
        let idx = usize::try_from(gpid.partition_index).ok()?;
        self.apps.get(&gpid.app_id)?.partitions.get(idx)
    }

    pub fn config_mut(&mut self, gpid: Gpid) -> Option<&mut PartitionConfig> {
        let idx = usize::try_from(gpid.partition_index).ok()?;
        self.apps.get_mut(&gpid.app_id)?.partitions.get_mut(idx)
    }

    pub fn context(&self, gpid: Gpid) -> Option<&ConfigContext> {
        let idx = usize::try_from(gpid.partition_index).ok()?;
        self.apps.get(&gpid.app_id)?.contexts.get(idx)
    }

    pub fn context_mut(&mut self, gpid: Gpid) -> Option<&mut ConfigContext> {
        let idx = usize::try_from(gpid.partition_index).ok()?;
        self.apps.get_mut(&gpid.app_id)?.contexts.get_mut(idx)
    }

    pub fn node(&self, node: &NodeId) -> Option<&NodeState> {
        self.nodes.get(node)
    }

    /// Node state, created dead if unknown
    pub fn node_mut(&mut self, node: &NodeId) -> &mut NodeState {
        self.nodes
            .entry(node.clone())
            .or_insert_with(|| NodeState::new(node.clone()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values()
    }

    pub fn alive_nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values().filter(|ns| ns.is_alive())
    }

    pub fn is_alive(&self, node: &NodeId) -> bool {
        self.nodes.get(node).is_some_and(NodeState::is_alive)
    }

    /// Rebuild every node's role sets from the partition configurations
    pub fn initialize_node_state(&mut self) {
        for ns in self.nodes.values_mut() {
            ns.clear_partitions();
        }
        let mut assignments = Vec::new();
        for app in self.apps.values() {
            for pc in &app.partitions {
                crate::meta::state_machine::check_invariants(pc);
                if let Some(primary) = &pc.primary {
                    assignments.push((primary.clone(), pc.pid, true));
                }
                for secondary in &pc.secondaries {
                    assignments.push((secondary.clone(), pc.pid, false));
                }
            }
        }
        for (node, gpid, is_primary) in assignments {
            self.node_mut(&node).put_partition(gpid, is_primary);
        }
    }

    /// Count the role `action` hands out against its node until it is
    /// acknowledged or the next sweep starts
    pub fn add_pending(&mut self, gpid: Gpid, action: &ProposalAction) {
        let is_primary = match action.kind {
            ConfigType::AssignPrimary | ConfigType::UpgradeToPrimary => true,
            ConfigType::AddSecondary | ConfigType::UpgradeToSecondary => false,
            _ => return,
        };
        self.node_mut(&action.node).add_pending(gpid, is_primary);
    }

    pub fn clear_pending(&mut self) {
        for ns in self.nodes.values_mut() {
            ns.pending.clear();
        }
    }

    /// Store a replica report; reports from non-members feed the drop history.
    ///
    /// Returns false if the partition is unknown.
    pub fn collect_replica(&mut self, node: &NodeId, info: &ReplicaInfo) -> bool {
        self.node_mut(node).record_report(info.clone());

        let is_member = match self.config(info.pid) {
            Some(pc) => pc.is_member(node),
            None => return false,
        };
        if !is_member {
            if let Some(cc) = self.context_mut(info.pid) {
                cc.dropped.collect(node, info);
            }
        }
        true
    }
}
