//! Primary recovery after every replica of a partition was lost ("DDD")
//!
//! Only the newest two entries of `last_drops` are considered: they are the
//! replicas that left last and therefore the only ones that can hold every
//! committed write. A candidate is picked from their dropped records by ballot,
//! then last committed decree.

use crate::common::{Decree, Gpid, NodeId};
use crate::meta::view::{ClusterView, DroppedReplica};
use thiserror::Error;

/// Reasons recovery cannot pick a primary yet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryBlocked {
    #[error("partition {0} not found")]
    UnknownPartition(Gpid),

    #[error("no drop history")]
    NoDropHistory,

    #[error("dropped node {0} is not alive")]
    NodeNotAlive(NodeId),

    #[error("no dropped record for {0}")]
    MissingRecord(NodeId),

    #[error("replicas of {0} not collected yet")]
    NotCollected(NodeId),

    #[error("no dropped replica holds data")]
    NoCandidate,

    #[error("{higher} has the larger ballot but {lower} the larger decree")]
    BallotDecreeMismatch { higher: NodeId, lower: NodeId },

    #[error("{node} committed up to {decree}, behind {committed}")]
    DecreeBehind {
        node: NodeId,
        decree: Decree,
        committed: Decree,
    },
}

impl RecoveryBlocked {
    /// Blocked on missing information rather than contradictory history
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            RecoveryBlocked::NodeNotAlive(_)
                | RecoveryBlocked::MissingRecord(_)
                | RecoveryBlocked::NotCollected(_)
        )
    }
}

/// Number of newest `last_drops` entries a primary is chosen from
const RECOVERY_WINDOW: usize = 2;

/// Pick the node to receive ASSIGN_PRIMARY for a partition with no members
pub fn recover_primary(view: &ClusterView, gpid: Gpid) -> Result<NodeId, RecoveryBlocked> {
    let pc = view
        .config(gpid)
        .ok_or(RecoveryBlocked::UnknownPartition(gpid))?;
    let cc = view
        .context(gpid)
        .ok_or(RecoveryBlocked::UnknownPartition(gpid))?;

    match pc.last_drops.as_slice() {
        [] => return Err(RecoveryBlocked::NoDropHistory),
        [only] => {
            return if view.is_alive(only) {
                Ok(only.clone())
            } else {
                Err(RecoveryBlocked::NodeNotAlive(only.clone()))
            };
        }
        _ => {}
    }

    let window = &pc.last_drops[pc.last_drops.len() - RECOVERY_WINDOW..];
    let mut eligible: Vec<&DroppedReplica> = Vec::with_capacity(RECOVERY_WINDOW);
    for node in window {
        if !view.is_alive(node) {
            return Err(RecoveryBlocked::NodeNotAlive(node.clone()));
        }
        let record = cc
            .dropped
            .find(node)
            .ok_or_else(|| RecoveryBlocked::MissingRecord(node.clone()))?;
        if record.has_data() {
            eligible.push(record);
            continue;
        }
        let collected = view.node(node).is_some_and(|ns| ns.replicas_collected());
        if !collected {
            return Err(RecoveryBlocked::NotCollected(node.clone()));
        }
        tracing::debug!("{}: {} reported no data, skipped", gpid, node);
    }

    if let [older, newer] = eligible.as_slice() {
        if let Some((higher, lower)) = mismatch(older, newer) {
            return Err(RecoveryBlocked::BallotDecreeMismatch {
                higher: higher.node.clone(),
                lower: lower.node.clone(),
            });
        }
    }

    // max_by_key keeps the last maximum, so ties go to the newer drop
    let chosen = eligible
        .into_iter()
        .max_by_key(|r| (r.ballot, r.last_committed_decree))
        .ok_or(RecoveryBlocked::NoCandidate)?;

    if chosen.last_committed_decree < pc.last_committed_decree {
        return Err(RecoveryBlocked::DecreeBehind {
            node: chosen.node.clone(),
            decree: chosen.last_committed_decree,
            committed: pc.last_committed_decree,
        });
    }

    Ok(chosen.node.clone())
}

fn mismatch<'a>(
    a: &'a DroppedReplica,
    b: &'a DroppedReplica,
) -> Option<(&'a DroppedReplica, &'a DroppedReplica)> {
    if a.ballot > b.ballot && a.last_committed_decree < b.last_committed_decree {
        Some((a, b))
    } else if b.ballot > a.ballot && b.last_committed_decree < a.last_committed_decree {
        Some((b, a))
    } else {
        None
    }
}
