//! Error types for flowenrichd

use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while setting up or running the enricher.
///
/// Only `Config`, `PrefixSource` and `GeoDb` are fatal, and only during
/// initialization. Everything raised on the per-record path is logged and
/// the affected field is left untouched.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Prefix list could not be opened or read
    #[error("Prefix list {path}: {source}")]
    PrefixSource {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Geolocation database error
    #[error("Geolocation database error: {0}")]
    GeoDb(String),

    /// SNMP exchange failed
    #[error("SNMP query to {device} for '{oid}' failed: {reason}")]
    Snmp {
        device: IpAddr,
        oid: String,
        reason: String,
    },

    /// Query request queue is closed (cache shut down)
    #[error("Interface query queue closed")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON record
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EnrichError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        EnrichError::Config(message.into())
    }

    /// Creates an SNMP error.
    pub fn snmp(device: IpAddr, oid: impl Into<String>, reason: impl Into<String>) -> Self {
        EnrichError::Snmp {
            device,
            oid: oid.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for flowenrichd operations
pub type Result<T> = std::result::Result<T, EnrichError>;
