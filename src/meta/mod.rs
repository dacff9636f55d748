//! Meta server: cluster view, partition guardian and the surfaces around them

pub mod balancer;
pub mod guardian;
pub mod http;
pub mod recovery;
pub mod server;
pub mod server_state;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod transport;
pub mod view;

pub use balancer::{DummyBalancer, LoadBalancer};
pub use guardian::{PartitionGuardian, PartitionHealth};
pub use recovery::{recover_primary, RecoveryBlocked};
pub use server::MetaServer;
pub use server_state::{ServerState, SweepReport};
pub use service::{start_sweep_task, MetaService};
pub use store::{MemoryStore, MetaStore, MetadataStore};
pub use transport::{HttpTransport, InMemoryTransport, Transport};
pub use view::{AppInfo, AppState, ClusterView, DroppedReplica, NodeState};
