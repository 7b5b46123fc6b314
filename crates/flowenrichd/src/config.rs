//! Configuration file support for flowenrichd
//!
//! Loads and validates the enricher configuration from TOML files. Every
//! field has a default, so an empty file (or no file) yields a working
//! configuration with only protocol naming enabled.

use crate::error::{EnrichError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Customer id enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidConfig {
    /// Populate the `cid` field from the local address
    #[serde(default)]
    pub enabled: bool,

    /// Headerless CSV of `prefix,cid` rows
    #[serde(default = "default_cid_db")]
    pub db_path: PathBuf,
}

/// Remote country enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocConfig {
    /// Populate the `remote_country` field from the remote address
    #[serde(default)]
    pub enabled: bool,

    /// GeoLite2 Country database in MaxMind DB format
    #[serde(default = "default_geoloc_db")]
    pub db_path: PathBuf,
}

/// Protocol name enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoNameConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Sampling rate normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Rate assumed for records that do not carry one. This is an
    /// operator assumption, not a measurement.
    #[serde(default = "default_fallback_sampling_rate")]
    pub fallback_sampling_rate: u64,
}

/// SNMP interface metadata enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpConfig {
    #[serde(default)]
    pub enabled: bool,

    /// SNMPv2c community
    #[serde(default = "default_community")]
    pub community: String,

    /// Regex applied to ifAlias; the first capture group is kept
    #[serde(default = "default_ifdesc_regex")]
    pub ifdesc_regex: String,

    /// UDP port of the agents
    #[serde(default = "default_snmp_port")]
    pub port: u16,

    /// Timeout of a single GET exchange in milliseconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,

    /// Maximum number of outstanding queries
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Depth of the query request queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Lifetime of a cache entry after its last write, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Interval of the background refresh cycle, in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

/// Complete flowenrichd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnricherConfig {
    #[serde(default)]
    pub cid: CidConfig,

    #[serde(default)]
    pub geoloc: GeolocConfig,

    #[serde(default)]
    pub protoname: ProtoNameConfig,

    #[serde(default)]
    pub normalize: NormalizeConfig,

    #[serde(default)]
    pub snmp: SnmpConfig,
}

// Default functions
fn default_true() -> bool {
    true
}

fn default_cid_db() -> PathBuf {
    PathBuf::from("config/example_cid_db.csv")
}

fn default_geoloc_db() -> PathBuf {
    PathBuf::from("config/geolite2/GeoLite2-Country.mmdb")
}

fn default_fallback_sampling_rate() -> u64 {
    32
}

fn default_community() -> String {
    "public".to_string()
}

fn default_ifdesc_regex() -> String {
    "(.*)".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

fn default_query_timeout() -> u64 {
    1000
}

fn default_max_in_flight() -> usize {
    64
}

fn default_queue_depth() -> usize {
    4096
}

fn default_cache_ttl() -> u64 {
    3 * 60 * 60
}

fn default_refresh_interval() -> u64 {
    60 * 60
}

// Default implementations
impl Default for CidConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: default_cid_db(),
        }
    }
}

impl Default for GeolocConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: default_geoloc_db(),
        }
    }
}

impl Default for ProtoNameConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fallback_sampling_rate: default_fallback_sampling_rate(),
        }
    }
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            community: default_community(),
            ifdesc_regex: default_ifdesc_regex(),
            port: default_snmp_port(),
            query_timeout_ms: default_query_timeout(),
            max_in_flight: default_max_in_flight(),
            queue_depth: default_queue_depth(),
            cache_ttl_secs: default_cache_ttl(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl SnmpConfig {
    /// Get query timeout as Duration
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Get cache TTL as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Get refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Compile the interface description regex
    pub fn compile_ifdesc_regex(&self) -> Result<Regex> {
        Regex::new(&self.ifdesc_regex).map_err(|e| {
            EnrichError::config(format!(
                "invalid ifdesc_regex '{}': {}",
                self.ifdesc_regex, e
            ))
        })
    }
}

impl EnricherConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| {
            EnrichError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(EnrichError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EnrichError::config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cid.enabled && self.cid.db_path.as_os_str().is_empty() {
            return Err(EnrichError::config("cid.db_path must be set"));
        }

        if self.geoloc.enabled && self.geoloc.db_path.as_os_str().is_empty() {
            return Err(EnrichError::config("geoloc.db_path must be set"));
        }

        if self.normalize.fallback_sampling_rate == 0 {
            return Err(EnrichError::config(
                "normalize.fallback_sampling_rate must be > 0",
            ));
        }

        if self.snmp.enabled {
            self.snmp.compile_ifdesc_regex()?;

            if self.snmp.max_in_flight == 0 {
                return Err(EnrichError::config("snmp.max_in_flight must be > 0"));
            }
            if self.snmp.queue_depth == 0 {
                return Err(EnrichError::config("snmp.queue_depth must be > 0"));
            }
            if self.snmp.cache_ttl_secs == 0 {
                return Err(EnrichError::config("snmp.cache_ttl_secs must be > 0"));
            }
            if self.snmp.refresh_interval_secs == 0 {
                return Err(EnrichError::config(
                    "snmp.refresh_interval_secs must be > 0",
                ));
            }
        }

        Ok(())
    }
}
