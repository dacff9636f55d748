//! Outbound delivery of reconfiguration requests
//!
//! Sending is fire-and-forget: a lost request is re-derived by the next sweep,
//! and the replica's answer comes back as a separate acknowledgement.

use crate::common::{ConfigUpdateRequest, NodeId, METRICS};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Path on the replica node that accepts a proposal
pub const PROPOSAL_PATH: &str = "replica/config_proposal";

pub trait Transport: Send + Sync {
    fn send(&self, target: &NodeId, request: ConfigUpdateRequest);
}

/// Records every request instead of sending it
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    sent: Mutex<Vec<(NodeId, ConfigUpdateRequest)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything sent so far, oldest first
    pub fn take_sent(&self) -> Vec<(NodeId, ConfigUpdateRequest)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn sent_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, target: &NodeId, request: ConfigUpdateRequest) {
        METRICS.proposals_sent.inc();
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target.clone(), request));
    }
}

/// POSTs requests as JSON to `http://{target}/replica/config_proposal`
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    fn url(target: &NodeId) -> String {
        format!("http://{}/{}", target, PROPOSAL_PATH)
    }
}

impl Transport for HttpTransport {
    fn send(&self, target: &NodeId, request: ConfigUpdateRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime, dropping {} for {}", request.kind, target);
            return;
        };

        METRICS.proposals_sent.inc();
        let client = self.client.clone();
        let url = Self::url(target);
        let target = target.clone();
        runtime.spawn(async move {
            let pid = request.pid();
            let kind = request.kind;
            match client.post(&url).json(&request).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!("{}: {} delivered to {}", pid, kind, target);
                }
                Ok(resp) => {
                    tracing::warn!("{}: {} refused by {}: {}", pid, kind, target, resp.status());
                }
                Err(e) => {
                    tracing::warn!("{}: {} to {} failed: {}", pid, kind, target, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ConfigType, Gpid, PartitionConfig, ProposalAction};

    #[test]
    fn test_in_memory_transport_records() {
        let transport = InMemoryTransport::new();
        let target = NodeId::from("node-0:34801");
        let request = ConfigUpdateRequest::from_action(
            &ProposalAction::new(target.clone(), target.clone(), ConfigType::AssignPrimary),
            &PartitionConfig::new(Gpid::new(1, 0), 3),
        );
        transport.send(&target, request.clone());
        assert_eq!(transport.sent_count(), 1);

        let sent = transport.take_sent();
        assert_eq!(sent, vec![(target, request)]);
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_http_transport_url() {
        assert_eq!(
            HttpTransport::url(&NodeId::from("10.0.0.1:34801")),
            "http://10.0.0.1:34801/replica/config_proposal"
        );
    }

    #[test]
    fn test_http_transport_without_runtime_drops() {
        let transport = HttpTransport::new(Duration::from_millis(100));
        let target = NodeId::from("127.0.0.1:1");
        transport.send(
            &target,
            ConfigUpdateRequest::from_action(
                &ProposalAction::new(target.clone(), target.clone(), ConfigType::AssignPrimary),
                &PartitionConfig::new(Gpid::new(1, 0), 3),
            ),
        );
    }
}
