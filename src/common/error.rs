//! Error types for minimeta

use crate::common::types::{Ballot, ConfigType, Gpid, NodeId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Cluster View Errors ===
    #[error("App not found: {0}")]
    AppNotFound(i32),

    #[error("App already exists: {0}")]
    AppExists(i32),

    #[error("Partition not found: {0}")]
    PartitionNotFound(Gpid),

    // === Reconfiguration Errors ===
    #[error("Invalid transition {kind}({node}) on {pid}: {reason}")]
    InvalidTransition {
        pid: Gpid,
        kind: ConfigType,
        node: NodeId,
        reason: String,
    },

    #[error("Stale update on {pid}: expected ballot {expected}, got {actual}")]
    StaleBallot {
        pid: Gpid,
        expected: Ballot,
        actual: Ballot,
    },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::AppNotFound(_) | Error::PartitionNotFound(_) => StatusCode::NOT_FOUND,
            Error::AppExists(_) | Error::StaleBallot { .. } => StatusCode::CONFLICT,
            Error::InvalidConfig(_) | Error::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Error::AppNotFound(3).to_http_status(), StatusCode::NOT_FOUND);
        let stale = Error::StaleBallot {
            pid: Gpid::new(1, 0),
            expected: 3,
            actual: 5,
        };
        assert_eq!(stale.to_http_status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::Internal("boom".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
