//! Remote country lookup.

use crate::error::{EnrichError, Result};
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::net::IpAddr;
use std::path::Path;
use tracing::{info, instrument};

/// Maps an address to the ISO 3166-1 code of its country.
pub trait CountryLookup: Send + Sync {
    /// `Ok(None)` when the database has no record for the address.
    fn lookup(&self, addr: IpAddr) -> Result<Option<String>>;
}

/// GeoLite2 / GeoIP2 Country database loaded into memory.
pub struct MaxMindCountryDb {
    reader: Reader<Vec<u8>>,
}

impl MaxMindCountryDb {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)
            .map_err(|e| EnrichError::GeoDb(format!("{}: {}", path.display(), e)))?;

        info!(
            database_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            "Opened geolocation database"
        );
        Ok(Self { reader })
    }
}

impl std::fmt::Debug for MaxMindCountryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxMindCountryDb")
            .field("database_type", &self.reader.metadata.database_type)
            .finish()
    }
}

impl CountryLookup for MaxMindCountryDb {
    fn lookup(&self, addr: IpAddr) -> Result<Option<String>> {
        match self.reader.lookup::<geoip2::Country>(addr) {
            Ok(record) => Ok(record
                .country
                .and_then(|country| country.iso_code)
                .map(str::to_string)),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(EnrichError::GeoDb(e.to_string())),
        }
    }
}
