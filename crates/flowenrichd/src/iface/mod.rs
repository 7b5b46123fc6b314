//! Interface metadata: name, description and speed of the interfaces a flow
//! entered or left through, resolved over SNMP and cached.

pub mod cache;
pub mod querier;
pub mod types;

pub use cache::{
    truncate_description, CacheSettings, CacheStats, EntryState, InterfaceMetadataCache,
    RefreshReport,
};
pub use querier::{InterfaceQuerier, SnmpQuerier};
pub use types::{CacheKey, IfaceAttribute, IfaceValue, InterfaceInfo};
