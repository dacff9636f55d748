//! Partition guardian
//!
//! `cure` looks at one partition and decides the single next action that moves
//! it toward one primary plus `max_replica_count - 1` secondaries. `reconfig`
//! installs an acknowledged configuration into the cluster view.
//!
//! Candidate picks are load aware: the node with the fewest replicas wins, ties
//! broken by node id. Load includes roles proposed earlier in the same sweep
//! and not yet acknowledged, so a full sweep over a fresh cluster spreads
//! primaries and replicas evenly.

use crate::common::{
    format_timestamp_millis, timestamp_now_millis, ConfigType, ConfigUpdateRequest, Gpid,
    MembershipChange, NodeId, PartitionConfig, ProposalAction, METRICS,
};
use crate::meta::recovery::recover_primary;
use crate::meta::state_machine::check_invariants;
use crate::meta::view::{ClusterView, NodeState, INVALID_TIMESTAMP};
use serde::Serialize;
use std::time::Duration;

/// Health of a partition as seen by one `cure` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionHealth {
    Healthy,
    /// Under or over replicated, or a repair is in flight
    NeedsRepair,
    /// No primary and no safe way to pick one right now
    UnrecoverableForNow,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionGuardian {
    replica_assign_delay_for_dropouts: Duration,
}

impl PartitionGuardian {
    pub fn new(replica_assign_delay_for_dropouts: Duration) -> Self {
        Self {
            replica_assign_delay_for_dropouts,
        }
    }

    /// Decide the next action for `gpid`
    pub fn cure(
        &self,
        view: &mut ClusterView,
        gpid: Gpid,
    ) -> (PartitionHealth, Option<ProposalAction>) {
        if let Some(action) = self.from_proposals(view, gpid) {
            return (PartitionHealth::NeedsRepair, Some(action));
        }

        let Some(pc) = view.config(gpid) else {
            tracing::warn!("cure: unknown partition {}", gpid);
            return (PartitionHealth::UnrecoverableForNow, None);
        };

        if pc.primary.is_none() {
            self.on_missing_primary(view, pc)
        } else if pc.secondaries.len() + 1 < pc.max_replica_count {
            self.on_missing_secondary(view, pc)
        } else if pc.secondaries.len() + 1 > pc.max_replica_count {
            self.on_redundant_secondary(view, pc)
        } else {
            (PartitionHealth::Healthy, None)
        }
    }

    fn on_missing_primary(
        &self,
        view: &ClusterView,
        pc: &PartitionConfig,
    ) -> (PartitionHealth, Option<ProposalAction>) {
        let gpid = pc.pid;

        if !pc.secondaries.is_empty() {
            let candidate = pc
                .secondaries
                .iter()
                .filter_map(|n| view.node(n))
                .filter(|ns| ns.is_alive())
                .min_by_key(|ns| (ns.partition_load(), ns.node().clone()));
            return match candidate {
                Some(ns) => {
                    let node = ns.node().clone();
                    tracing::debug!("{}: upgrade secondary {} to primary", gpid, node);
                    (
                        PartitionHealth::NeedsRepair,
                        Some(ProposalAction::new(
                            node.clone(),
                            node,
                            ConfigType::UpgradeToPrimary,
                        )),
                    )
                }
                None => {
                    tracing::warn!("{}: no primary and no alive secondary", gpid);
                    (PartitionHealth::UnrecoverableForNow, None)
                }
            };
        }

        if pc.last_drops.is_empty() {
            let candidate = view
                .alive_nodes()
                .min_by_key(|ns| {
                    (ns.primary_load(), ns.partition_load(), ns.node().clone())
                });
            return match candidate {
                Some(ns) => {
                    let node = ns.node().clone();
                    tracing::debug!("{}: assign fresh primary {}", gpid, node);
                    (
                        PartitionHealth::NeedsRepair,
                        Some(ProposalAction::new(
                            node.clone(),
                            node,
                            ConfigType::AssignPrimary,
                        )),
                    )
                }
                None => {
                    tracing::debug!("{}: no alive node to assign primary to", gpid);
                    (PartitionHealth::UnrecoverableForNow, None)
                }
            };
        }

        match recover_primary(view, gpid) {
            Ok(node) => {
                tracing::info!("{}: recovered primary {} from drop history", gpid, node);
                (
                    PartitionHealth::NeedsRepair,
                    Some(ProposalAction::new(
                        node.clone(),
                        node,
                        ConfigType::AssignPrimary,
                    )),
                )
            }
            Err(blocked) if blocked.is_waiting() => {
                tracing::info!("{}: recovery waiting: {}", gpid, blocked);
                (PartitionHealth::UnrecoverableForNow, None)
            }
            Err(blocked) => {
                tracing::warn!("{}: recovery blocked: {}", gpid, blocked);
                (PartitionHealth::UnrecoverableForNow, None)
            }
        }
    }

    fn on_missing_secondary(
        &self,
        view: &ClusterView,
        pc: &PartitionConfig,
    ) -> (PartitionHealth, Option<ProposalAction>) {
        let gpid = pc.pid;
        let Some(primary) = pc.primary.clone() else {
            return (PartitionHealth::UnrecoverableForNow, None);
        };
        if !view.is_alive(&primary) {
            tracing::debug!("{}: primary {} is not alive", gpid, primary);
            return (PartitionHealth::NeedsRepair, None);
        }

        if let Some((node, time)) = self.recent_dropout(view, gpid) {
            tracing::debug!(
                "{}: waiting for {} dropped at {} to come back",
                gpid,
                node,
                format_timestamp_millis(time)
            );
            return (PartitionHealth::NeedsRepair, None);
        }

        let candidate = view
            .alive_nodes()
            .filter(|ns| !pc.is_member(ns.node()))
            .min_by_key(|ns| (ns.partition_load(), ns.node().clone()));
        match candidate {
            Some(ns) => {
                let node = ns.node().clone();
                tracing::debug!("{}: add secondary {} via {}", gpid, node, primary);
                (
                    PartitionHealth::NeedsRepair,
                    Some(ProposalAction::new(primary, node, ConfigType::AddSecondary)),
                )
            }
            None => {
                tracing::debug!("{}: no candidate for a new secondary", gpid);
                (PartitionHealth::NeedsRepair, None)
            }
        }
    }

    fn on_redundant_secondary(
        &self,
        view: &ClusterView,
        pc: &PartitionConfig,
    ) -> (PartitionHealth, Option<ProposalAction>) {
        let Some(primary) = pc.primary.clone() else {
            return (PartitionHealth::UnrecoverableForNow, None);
        };
        if !view.is_alive(&primary) {
            return (PartitionHealth::NeedsRepair, None);
        }

        let victim = pc
            .secondaries
            .iter()
            .max_by_key(|n| (view.node(n).map_or(0, NodeState::partition_count), *n));
        match victim {
            Some(node) => {
                tracing::debug!("{}: remove redundant secondary {}", pc.pid, node);
                (
                    PartitionHealth::NeedsRepair,
                    Some(ProposalAction::new(primary, node.clone(), ConfigType::Remove)),
                )
            }
            None => (PartitionHealth::NeedsRepair, None),
        }
    }

    /// A dead node that left the partition within the dropout delay
    fn recent_dropout(&self, view: &ClusterView, gpid: Gpid) -> Option<(NodeId, u64)> {
        if self.replica_assign_delay_for_dropouts.is_zero() {
            return None;
        }
        let delay = self.replica_assign_delay_for_dropouts.as_millis() as u64;
        let now = timestamp_now_millis();
        view.context(gpid)?
            .dropped
            .iter()
            .filter(|r| r.time != INVALID_TIMESTAMP && !view.is_alive(&r.node))
            .find(|r| now.saturating_sub(r.time) < delay)
            .map(|r| (r.node.clone(), r.time))
    }

    /// Front of the proposal queue if it is still valid.
    ///
    /// Invalid proposals are discarded; a valid one stays queued until the
    /// matching update is acknowledged, so a lost request is re-issued.
    pub fn from_proposals(&self, view: &mut ClusterView, gpid: Gpid) -> Option<ProposalAction> {
        loop {
            let action = view.context(gpid)?.proposals.front()?.clone();
            match validate_proposal(view, gpid, &action) {
                Ok(()) => return Some(action),
                Err(reason) => {
                    tracing::warn!("{}: discard proposal {}: {}", gpid, action, reason);
                    METRICS.proposals_discarded.inc();
                    view.context_mut(gpid)?.proposals.pop_front();
                }
            }
        }
    }

    /// Install an acknowledged update into the view
    pub fn reconfig(&self, view: &mut ClusterView, request: &ConfigUpdateRequest) {
        let gpid = request.pid();
        let Some(old) = view.config(gpid).cloned() else {
            tracing::warn!("reconfig: unknown partition {}", gpid);
            return;
        };
        let new = installed_config(&old, request);
        check_invariants(&new);

        view.node_mut(&request.node).remove_pending(&gpid);
        for node in old.members().filter(|n| !new.is_member(n)) {
            view.node_mut(node).remove_partition(&gpid);
        }
        if let Some(primary) = &new.primary {
            view.node_mut(primary).put_partition(gpid, true);
        }
        for secondary in &new.secondaries {
            view.node_mut(secondary).put_partition(gpid, false);
        }

        if let Some(cc) = view.context_mut(gpid) {
            match request.kind.membership_change() {
                Some(MembershipChange::Removed) => {
                    cc.dropped.record_drop(&request.node, timestamp_now_millis());
                }
                Some(MembershipChange::Added) => {
                    cc.dropped.remove(&request.node);
                }
                None => {}
            }

            let acknowledged = cc.proposals.front().is_some_and(|front| {
                front.node == request.node
                    && (front.kind == request.kind
                        || (front.kind.is_add_secondary() && request.kind.is_add_secondary()))
            });
            if acknowledged {
                cc.proposals.pop_front();
            }
        }

        tracing::info!(
            "{}: {}({}) installed, ballot {} -> {}",
            gpid,
            request.kind,
            request.node,
            old.ballot,
            new.ballot
        );
        if let Some(slot) = view.config_mut(gpid) {
            *slot = new;
        }
    }
}

/// Configuration that `reconfig` installs for `request` on top of `old`.
///
/// Membership and ballot come from the request; the drop history and replica
/// bound are owned by the meta server.
pub fn installed_config(old: &PartitionConfig, request: &ConfigUpdateRequest) -> PartitionConfig {
    let mut pc = request.config.clone();
    pc.max_replica_count = old.max_replica_count;
    pc.last_committed_decree = pc.last_committed_decree.max(old.last_committed_decree);
    pc.last_drops = old.last_drops.clone();

    match request.kind.membership_change() {
        Some(MembershipChange::Removed) => {
            pc.last_drops.retain(|n| n != &request.node);
            pc.last_drops.push(request.node.clone());
            let excess = pc.last_drops.len().saturating_sub(pc.max_replica_count);
            pc.last_drops.drain(..excess);
        }
        Some(MembershipChange::Added) => {
            pc.last_drops.retain(|n| n != &request.node);
        }
        None => {}
    }
    pc
}

/// Why a queued proposal can no longer be applied, if it can't
fn validate_proposal(
    view: &ClusterView,
    gpid: Gpid,
    action: &ProposalAction,
) -> Result<(), &'static str> {
    let pc = view.config(gpid).ok_or("unknown partition")?;

    if action.target.is_invalid() {
        return Err("unset target");
    }
    if action.node.is_invalid() {
        return Err("unset node");
    }
    if !view.is_alive(&action.target) {
        return Err("target not alive");
    }

    match action.kind {
        ConfigType::AssignPrimary => {
            if pc.primary.is_some() {
                return Err("primary already present");
            }
        }
        ConfigType::UpgradeToPrimary => {
            if pc.primary.is_some() {
                return Err("primary already present");
            }
            if !pc.is_secondary(&action.node) {
                return Err("not a secondary");
            }
        }
        ConfigType::AddSecondary | ConfigType::UpgradeToSecondary => {
            if pc.is_member(&action.node) {
                return Err("already a member");
            }
            if !view.is_alive(&action.node) {
                return Err("node not alive");
            }
            let failed = view
                .node(&action.node)
                .and_then(|ns| ns.latest_report(&gpid))
                .is_some_and(|info| info.status.is_failed());
            if failed {
                return Err("abnormal learning");
            }
        }
        ConfigType::Remove | ConfigType::DowngradeToInactive => {
            if !pc.is_member(&action.node) {
                return Err("not a member");
            }
        }
        ConfigType::DowngradeToSecondary => {
            if !pc.is_primary(&action.node) {
                return Err("not the primary");
            }
        }
    }
    Ok(())
}
