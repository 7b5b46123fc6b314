//! # flowenrichd - Flow Record Enrichment
//!
//! Annotates network flow records in place with business and operational
//! context before they are forwarded downstream.
//!
//! ## Enrichments
//! - Customer id of the local address (longest-prefix match over a CSV
//!   prefix list)
//! - ISO country code of the remote address (GeoLite2 Country database)
//! - Well-known protocol name
//! - Counters normalized by the sampling rate
//! - Name, description and speed of the ingress and egress interfaces,
//!   resolved over SNMP and cached
//!
//! ## Local and remote
//! The exporting interface is assumed to sit at the network border. For
//! ingress flows (direction 0) the destination is local; for egress flows
//! (direction 1) the source is. Records with any other direction get no
//! customer id or country.
//!
//! ## Example
//! ```no_run
//! use flowenrichd::{EnricherConfig, EnrichmentOrchestrator};
//!
//! let mut config = EnricherConfig::default();
//! config.cid.enabled = true;
//! config.cid.db_path = "/etc/flowenrichd/cid.csv".into();
//!
//! let enricher = EnrichmentOrchestrator::new(config);
//! enricher.initialize()?;
//! # Ok::<(), flowenrichd::EnrichError>(())
//! ```

pub mod config;
pub mod enricher;
pub mod error;
pub mod geoloc;
pub mod iface;
pub mod normalize;
pub mod prefix_table;
pub mod protoname;
pub mod transport;

pub use config::EnricherConfig;
pub use enricher::EnrichmentOrchestrator;
pub use error::{EnrichError, Result};
pub use geoloc::{CountryLookup, MaxMindCountryDb};
pub use iface::{InterfaceInfo, InterfaceMetadataCache, InterfaceQuerier, SnmpQuerier};
pub use prefix_table::{LoadReport, PrefixTable};
pub use transport::{pump, FlowSink, FlowSource, JsonLinesSink, JsonLinesSource};
