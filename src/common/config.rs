//! Configuration for the meta server

use crate::common::utils::parse_duration;
use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for overrides, e.g. `MINIMETA__META__SWEEP_INTERVAL=2s`
const ENV_PREFIX: &str = "MINIMETA";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Meta server config
    #[serde(default)]
    pub meta: MetaServerConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "meta-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            meta: MetaServerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from an optional TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.meta.validate()?;
        Ok(config)
    }
}

/// Meta server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaServerConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// RocksDB path for partition configurations (in-memory when unset)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Pause between two partition sweeps ("500ms", "5s", ...)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    /// How long to wait for a dropped secondary to come back before adding a
    /// new one ("0s" disables the wait)
    #[serde(default = "default_dropout_delay")]
    pub replica_assign_delay_for_dropouts: String,

    /// Timeout of one outbound proposal request
    #[serde(default = "default_proposal_timeout")]
    pub proposal_timeout: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 34601))
}
fn default_sweep_interval() -> String {
    "10s".to_string()
}
fn default_dropout_delay() -> String {
    "0s".to_string()
}
fn default_proposal_timeout() -> String {
    "3s".to_string()
}

impl Default for MetaServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: None,
            sweep_interval: default_sweep_interval(),
            replica_assign_delay_for_dropouts: default_dropout_delay(),
            proposal_timeout: default_proposal_timeout(),
        }
    }
}

impl MetaServerConfig {
    pub fn sweep_interval(&self) -> Result<Duration> {
        parse_duration(&self.sweep_interval)
    }

    pub fn replica_assign_delay_for_dropouts(&self) -> Result<Duration> {
        parse_duration(&self.replica_assign_delay_for_dropouts)
    }

    pub fn proposal_timeout(&self) -> Result<Duration> {
        parse_duration(&self.proposal_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval()?.is_zero() {
            return Err(crate::Error::InvalidConfig(
                "sweep_interval must be positive".into(),
            ));
        }
        self.replica_assign_delay_for_dropouts()?;
        self.proposal_timeout()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MetaServerConfig::default();
        assert_eq!(config.sweep_interval().unwrap(), Duration::from_secs(10));
        assert!(config.replica_assign_delay_for_dropouts().unwrap().is_zero());
        assert!(config.db_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "node_id = \"meta-7\"\nlog_level = \"minimeta=debug\"\n\n[meta]\nbind_addr = \"127.0.0.1:34602\"\nsweep_interval = \"500ms\""
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.node_id, "meta-7");
        assert_eq!(config.meta.bind_addr.port(), 34602);
        assert_eq!(
            config.meta.sweep_interval().unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(config.log_level, "minimeta=debug");
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = MetaServerConfig {
            sweep_interval: "0s".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
