//! Load balancer seam
//!
//! A balancer looks at a settled cluster and queues proposals on partitions;
//! the guardian validates and issues them on later sweeps.

use crate::common::{Gpid, ProposalAction};
use crate::meta::view::ClusterView;

pub trait LoadBalancer: Send + Sync {
    /// Proposals to queue, per partition. Replaces whatever is queued there.
    fn balance(&self, view: &ClusterView) -> Vec<(Gpid, Vec<ProposalAction>)>;

    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// Balancer that never proposes anything
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyBalancer;

impl LoadBalancer for DummyBalancer {
    fn balance(&self, _view: &ClusterView) -> Vec<(Gpid, Vec<ProposalAction>)> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "dummy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_balancer_proposes_nothing() {
        let balancer = DummyBalancer;
        assert!(balancer.balance(&ClusterView::new()).is_empty());
        assert_eq!(balancer.name(), "dummy");
    }
}
