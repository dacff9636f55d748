//! Common utilities and types shared across minimeta

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;

pub use config::{Config, MetaServerConfig};
pub use error::{Error, Result};
pub use metrics::METRICS;
pub use types::{
    Ballot, ConfigType, ConfigUpdateRequest, ConfigUpdateResponse, Decree, Gpid,
    MembershipChange, NodeId, PartitionConfig, ProposalAction, ReplicaInfo, ReplicaStatus,
    INVALID_BALLOT, INVALID_DECREE,
};
pub use utils::{format_timestamp_millis, parse_duration, timestamp_now_millis};
