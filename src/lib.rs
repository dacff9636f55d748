//! # minimeta
//!
//! Placement and repair engine of a meta server for a replicated,
//! partitioned store:
//! - Cluster view of apps, partition configurations and node loads
//! - Partition guardian that derives one repair action per partition and sweep
//! - Primary recovery from dropped replicas when every member is gone
//! - Pluggable load balancer feeding a per-partition proposal queue
//! - RocksDB-backed persistence of partition configurations
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   failure detector        replicas
//!         │ node_state        │ replica_report / update_configuration
//! ┌───────▼───────────────────▼────────┐
//! │            Meta server             │
//! │  sweep ─► guardian ─► proposals    │
//! │  view ◄── reconfig ◄── acks        │
//! └───────┬────────────────────────────┘
//!         │ config_proposal (HTTP)
//!   ┌─────▼─────┐   ┌───────────┐   ┌───────────┐
//!   │ replica 1 │   │ replica 2 │   │ replica 3 │
//!   └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! minimeta serve --id meta-1 --bind 0.0.0.0:34601 --db ./meta-data
//! minimeta status --meta http://localhost:34601
//! ```

pub mod common;
pub mod meta;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use meta::MetaServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
