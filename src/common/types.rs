//! Shared types for partition configuration and reconfiguration requests
//!
//! These are the payloads exchanged between the meta server and replica nodes:
//! partition configurations, proposal actions, replica reports and the
//! configuration update request that carries one action to its target node.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Ballot = i64;
pub type Decree = i64;

/// Ballot or decree value that has not been reported yet
pub const INVALID_BALLOT: Ballot = -1;
pub const INVALID_DECREE: Decree = -1;

/// Host identifier of a replica node (usually `host:port`).
///
/// The empty identifier is the unset node.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The unset node
    pub fn invalid() -> Self {
        Self(String::new())
    }

    pub fn is_invalid(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<invalid>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Global partition id: (app id, partition index)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Gpid {
    pub app_id: i32,
    pub partition_index: i32,
}

impl Gpid {
    pub fn new(app_id: i32, partition_index: i32) -> Self {
        Self {
            app_id,
            partition_index,
        }
    }
}

impl fmt::Display for Gpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_id, self.partition_index)
    }
}

/// Reconfiguration action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    AssignPrimary,
    UpgradeToPrimary,
    AddSecondary,
    /// ADD_SECONDARY once the learner has been admitted
    UpgradeToSecondary,
    DowngradeToSecondary,
    DowngradeToInactive,
    Remove,
}

/// How an action changes the member set of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Added,
    Removed,
}

impl ConfigType {
    /// `None` for role changes among existing members.
    pub fn membership_change(&self) -> Option<MembershipChange> {
        match self {
            ConfigType::AssignPrimary
            | ConfigType::AddSecondary
            | ConfigType::UpgradeToSecondary => Some(MembershipChange::Added),
            ConfigType::DowngradeToInactive | ConfigType::Remove => {
                Some(MembershipChange::Removed)
            }
            ConfigType::UpgradeToPrimary | ConfigType::DowngradeToSecondary => None,
        }
    }

    pub fn is_add_secondary(&self) -> bool {
        matches!(
            self,
            ConfigType::AddSecondary | ConfigType::UpgradeToSecondary
        )
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigType::AssignPrimary => "assign_primary",
            ConfigType::UpgradeToPrimary => "upgrade_to_primary",
            ConfigType::AddSecondary => "add_secondary",
            ConfigType::UpgradeToSecondary => "upgrade_to_secondary",
            ConfigType::DowngradeToSecondary => "downgrade_to_secondary",
            ConfigType::DowngradeToInactive => "downgrade_to_inactive",
            ConfigType::Remove => "remove",
        };
        write!(f, "{}", s)
    }
}

/// Membership of one partition as known by the meta server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub pid: Gpid,
    pub ballot: Ballot,
    pub max_replica_count: usize,
    pub primary: Option<NodeId>,
    pub secondaries: Vec<NodeId>,
    /// Nodes that recently left the partition, oldest first
    pub last_drops: Vec<NodeId>,
    pub last_committed_decree: Decree,
}

impl PartitionConfig {
    pub fn new(pid: Gpid, max_replica_count: usize) -> Self {
        Self {
            pid,
            ballot: 0,
            max_replica_count,
            primary: None,
            secondaries: Vec::new(),
            last_drops: Vec::new(),
            last_committed_decree: 0,
        }
    }

    pub fn is_primary(&self, node: &NodeId) -> bool {
        self.primary.as_ref() == Some(node)
    }

    pub fn is_secondary(&self, node: &NodeId) -> bool {
        self.secondaries.contains(node)
    }

    pub fn is_member(&self, node: &NodeId) -> bool {
        self.is_primary(node) || self.is_secondary(node)
    }

    /// Primary first, then secondaries in order
    pub fn members(&self) -> impl Iterator<Item = &NodeId> {
        self.primary.iter().chain(self.secondaries.iter())
    }

    pub fn member_count(&self) -> usize {
        self.secondaries.len() + usize::from(self.primary.is_some())
    }
}

/// Role a replica reports for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Inactive,
    Error,
    Primary,
    Secondary,
    PotentialSecondary,
}

impl ReplicaStatus {
    /// Terminal failure reported by the replica
    pub fn is_failed(&self) -> bool {
        matches!(self, ReplicaStatus::Error)
    }
}

/// Per-partition state reported by a replica node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub pid: Gpid,
    pub status: ReplicaStatus,
    pub ballot: Ballot,
    pub last_committed_decree: Decree,
    pub last_prepared_decree: Decree,
}

/// A placement action proposed for one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalAction {
    /// Node the request is sent to
    pub target: NodeId,
    /// Node the action is about
    pub node: NodeId,
    pub kind: ConfigType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<NodeId>,
}

impl ProposalAction {
    pub fn new(target: NodeId, node: NodeId, kind: ConfigType) -> Self {
        Self {
            target,
            node,
            kind,
            extra: None,
        }
    }
}

impl fmt::Display for ProposalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> {}", self.kind, self.node, self.target)
    }
}

/// Request carrying one action to its target node.
///
/// `config` is the meta server's configuration when the request was built; the
/// replica applies the action to it and sends the result back, so the ballot in an
/// acknowledgement is exactly one above the one the meta server holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdateRequest {
    pub target: NodeId,
    pub node: NodeId,
    pub kind: ConfigType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<NodeId>,
    pub config: PartitionConfig,
}

impl ConfigUpdateRequest {
    pub fn from_action(action: &ProposalAction, config: &PartitionConfig) -> Self {
        Self {
            target: action.target.clone(),
            node: action.node.clone(),
            kind: action.kind,
            extra: action.extra.clone(),
            config: config.clone(),
        }
    }

    pub fn pid(&self) -> Gpid {
        self.config.pid
    }
}

/// Answer to an acknowledged update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Configuration held by the meta server after handling the update
    pub config: Option<PartitionConfig>,
}
