//! EnrichmentOrchestrator - one enrichment pass per flow record.
//!
//! Owns every lookup resource (prefix table, country database, interface
//! metadata cache) and applies the enabled enrichers in a fixed order:
//! customer id, remote country, protocol name, normalization, interface
//! metadata. Each step writes disjoint fields and is skipped on error.

use crate::config::EnricherConfig;
use crate::error::{EnrichError, Result};
use crate::geoloc::{CountryLookup, MaxMindCountryDb};
use crate::iface::{CacheSettings, InterfaceMetadataCache, InterfaceQuerier, SnmpQuerier};
use crate::normalize;
use crate::prefix_table::PrefixTable;
use crate::protoname;
use flow_types::FlowRecord;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, instrument, trace, warn};

/// Initialization state of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    /// Initialization failed; the reason is kept and not retried
    Failed(String),
}

/// Lookup resources, present only for the enrichers that need them.
struct Resources {
    prefixes: Option<Arc<PrefixTable>>,
    countries: Option<Arc<dyn CountryLookup>>,
    interfaces: Option<Arc<InterfaceMetadataCache>>,
}

/// Applies the configured enrichments to flow records.
///
/// Safe to share between tasks; [`process`](Self::process) takes `&self`
/// and never waits on the network.
pub struct EnrichmentOrchestrator {
    config: EnricherConfig,
    prefix_table: Option<Arc<PrefixTable>>,
    country_lookup: Option<Arc<dyn CountryLookup>>,
    interface_querier: Option<Arc<dyn InterfaceQuerier>>,
    state: Mutex<Lifecycle>,
    resources: OnceLock<Resources>,
}

impl std::fmt::Debug for EnrichmentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentOrchestrator")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl EnrichmentOrchestrator {
    pub fn new(config: EnricherConfig) -> Self {
        Self {
            config,
            prefix_table: None,
            country_lookup: None,
            interface_querier: None,
            state: Mutex::new(Lifecycle::Uninitialized),
            resources: OnceLock::new(),
        }
    }

    /// Uses `table` instead of loading `cid.db_path`.
    pub fn with_prefix_table(mut self, table: PrefixTable) -> Self {
        self.prefix_table = Some(Arc::new(table));
        self
    }

    /// Uses `lookup` instead of opening `geoloc.db_path`.
    pub fn with_country_lookup(mut self, lookup: Arc<dyn CountryLookup>) -> Self {
        self.country_lookup = Some(lookup);
        self
    }

    /// Uses `querier` instead of SNMP for interface metadata.
    pub fn with_interface_querier(mut self, querier: Arc<dyn InterfaceQuerier>) -> Self {
        self.interface_querier = Some(querier);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.resources.get().is_some()
    }

    /// The interface metadata cache, once initialized with SNMP enabled.
    pub fn interface_cache(&self) -> Option<&Arc<InterfaceMetadataCache>> {
        self.resources.get().and_then(|r| r.interfaces.as_ref())
    }

    /// Sets up the resources of every enabled enricher.
    ///
    /// Only the first call does any work; concurrent first calls wait for
    /// it. A failure is remembered and returned by every later call.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let mut state = self.state.lock();
        match &*state {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Failed(reason) => {
                return Err(EnrichError::config(format!(
                    "enricher initialization failed earlier: {}",
                    reason
                )))
            }
            Lifecycle::Uninitialized => {}
        }

        match self.build_resources() {
            Ok(resources) => {
                // Only set while holding the state lock, so this cannot collide.
                let _ = self.resources.set(resources);
                *state = Lifecycle::Ready;
                info!(
                    cid = self.config.cid.enabled,
                    geoloc = self.config.geoloc.enabled,
                    protoname = self.config.protoname.enabled,
                    normalize = self.config.normalize.enabled,
                    snmp = self.config.snmp.enabled,
                    "Enricher initialized"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Enricher initialization failed");
                *state = Lifecycle::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn build_resources(&self) -> Result<Resources> {
        let prefixes = if self.config.cid.enabled {
            Some(match &self.prefix_table {
                Some(table) => Arc::clone(table),
                None => Arc::new(PrefixTable::load_csv(&self.config.cid.db_path)?),
            })
        } else {
            None
        };

        let countries = if self.config.geoloc.enabled {
            Some(match &self.country_lookup {
                Some(lookup) => Arc::clone(lookup),
                None => {
                    Arc::new(MaxMindCountryDb::open(&self.config.geoloc.db_path)?)
                        as Arc<dyn CountryLookup>
                }
            })
        } else {
            None
        };

        let interfaces = if self.config.snmp.enabled {
            let settings = CacheSettings::from_config(&self.config.snmp)?;
            let querier = match &self.interface_querier {
                Some(querier) => Arc::clone(querier),
                None => Arc::new(SnmpQuerier::from_config(&self.config.snmp)) as Arc<dyn InterfaceQuerier>,
            };
            let cache = InterfaceMetadataCache::new(settings, querier);
            cache.start()?;
            Some(cache)
        } else {
            None
        };

        Ok(Resources {
            prefixes,
            countries,
            interfaces,
        })
    }

    /// Enriches one record and hands it back.
    ///
    /// Initializes on first use. If initialization fails the record is
    /// returned unchanged.
    pub fn process(&self, mut record: FlowRecord) -> FlowRecord {
        let resources = match self.ready_resources() {
            Ok(resources) => resources,
            Err(e) => {
                trace!(error = %e, "Enricher not ready, forwarding record unchanged");
                return record;
            }
        };

        let (local, remote) = record.endpoints();

        if let (Some(table), Some(local)) = (&resources.prefixes, local) {
            record.cid = table.resolve(Some(local));
        }

        if let (Some(countries), Some(remote)) = (&resources.countries, remote) {
            add_country(countries.as_ref(), remote, &mut record);
        }

        if self.config.protoname.enabled {
            protoname::apply(&mut record);
        }

        if self.config.normalize.enabled {
            normalize::apply(&mut record, self.config.normalize.fallback_sampling_rate);
        }

        if let Some(cache) = &resources.interfaces {
            add_interfaces(cache, &mut record);
        }

        record
    }

    fn ready_resources(&self) -> Result<&Resources> {
        if let Some(resources) = self.resources.get() {
            return Ok(resources);
        }
        self.initialize()?;
        self.resources
            .get()
            .ok_or_else(|| EnrichError::config("enricher resources missing after initialization"))
    }

    /// Stops the interface metadata cache's background tasks, if any.
    pub async fn shutdown(&self) {
        if let Some(cache) = self.interface_cache() {
            cache.shutdown().await;
        }
    }
}

fn add_country(countries: &dyn CountryLookup, remote: IpAddr, record: &mut FlowRecord) {
    match countries.lookup(remote) {
        Ok(Some(code)) => record.remote_country = code,
        Ok(None) => trace!(%remote, "No geolocation record"),
        Err(e) => warn!(%remote, error = %e, "Geolocation lookup failed"),
    }
}

/// Ingress interface fills `src_if_*`, egress interface `dst_if_*`, both
/// resolved against the exporting device.
fn add_interfaces(cache: &InterfaceMetadataCache, record: &mut FlowRecord) {
    let Some(device) = record.sampler_address else {
        return;
    };

    if record.in_if > 0 {
        let info = cache.resolve(device, record.in_if);
        record.src_if_name = info.name;
        record.src_if_desc = info.description;
        record.src_if_speed = info.speed;
    }

    if record.out_if > 0 {
        let info = cache.resolve(device, record.out_if);
        record.dst_if_name = info.name;
        record.dst_if_desc = info.description;
        record.dst_if_speed = info.speed;
    }
}
