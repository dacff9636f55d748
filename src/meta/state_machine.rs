//! Reconfiguration state machine
//!
//! Applies one accepted action to a partition configuration. Pure: no
//! persistence, no I/O. Every accepted action bumps the ballot by exactly one;
//! a rejected action leaves the configuration untouched.

use crate::common::{ConfigType, ConfigUpdateRequest, Error, Gpid, NodeId, PartitionConfig, Result};

fn invalid(pid: Gpid, kind: ConfigType, node: &NodeId, reason: &str) -> Error {
    Error::InvalidTransition {
        pid,
        kind,
        node: node.clone(),
        reason: reason.to_string(),
    }
}

impl PartitionConfig {
    /// Apply `kind` for `node` and return the kind as it should be reported back
    /// (ADD_SECONDARY becomes UPGRADE_TO_SECONDARY).
    pub fn apply_action(&mut self, kind: ConfigType, node: &NodeId) -> Result<ConfigType> {
        if node.is_invalid() {
            return Err(invalid(self.pid, kind, node, "unset node"));
        }

        let applied = match kind {
            ConfigType::AssignPrimary => {
                if self.primary.is_some() {
                    return Err(invalid(self.pid, kind, node, "primary already present"));
                }
                self.secondaries.retain(|n| n != node);
                self.primary = Some(node.clone());
                kind
            }
            ConfigType::UpgradeToPrimary => {
                if self.primary.is_some() {
                    return Err(invalid(self.pid, kind, node, "primary already present"));
                }
                if !self.is_secondary(node) {
                    return Err(invalid(self.pid, kind, node, "not a secondary"));
                }
                self.secondaries.retain(|n| n != node);
                self.primary = Some(node.clone());
                kind
            }
            ConfigType::AddSecondary | ConfigType::UpgradeToSecondary => {
                if self.is_member(node) {
                    return Err(invalid(self.pid, kind, node, "already a member"));
                }
                self.secondaries.push(node.clone());
                ConfigType::UpgradeToSecondary
            }
            ConfigType::Remove | ConfigType::DowngradeToInactive => {
                if self.is_primary(node) {
                    self.primary = None;
                } else if self.is_secondary(node) {
                    self.secondaries.retain(|n| n != node);
                } else {
                    return Err(invalid(self.pid, kind, node, "not a member"));
                }
                kind
            }
            ConfigType::DowngradeToSecondary => {
                if !self.is_primary(node) {
                    return Err(invalid(self.pid, kind, node, "not the primary"));
                }
                self.primary = None;
                self.secondaries.push(node.clone());
                kind
            }
        };

        self.ballot += 1;
        check_invariants(self);
        Ok(applied)
    }
}

/// Apply the request's action to its carried configuration, in place.
///
/// This is what a replica does before acknowledging a proposal.
pub fn apply_update(request: &mut ConfigUpdateRequest) -> Result<()> {
    let kind = request.config.apply_action(request.kind, &request.node)?;
    request.kind = kind;
    Ok(())
}

/// Panics if a node holds two roles in one partition
pub fn check_invariants(pc: &PartitionConfig) {
    if let Some(primary) = &pc.primary {
        assert!(
            !pc.secondaries.contains(primary),
            "{}: primary {} is also a secondary",
            pc.pid,
            primary
        );
    }
    for (i, secondary) in pc.secondaries.iter().enumerate() {
        assert!(
            !pc.secondaries[i + 1..].contains(secondary),
            "{}: secondary {} listed twice",
            pc.pid,
            secondary
        );
    }
}
