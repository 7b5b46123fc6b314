//! Out-of-band interface attribute queries.

use crate::config::SnmpConfig;
use crate::error::{EnrichError, Result};
use crate::iface::types::{CacheKey, IfaceAttribute, IfaceValue};
use async_trait::async_trait;
use snmp::{SyncSession, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::trace;

/// Resolves a single interface attribute from its device.
///
/// Implementations return the raw value; description truncation is applied
/// by the cache. A call may take as long as the transport timeout.
#[async_trait]
pub trait InterfaceQuerier: Send + Sync + 'static {
    async fn query(&self, key: &CacheKey) -> Result<IfaceValue>;
}

/// SNMPv2c GET against the device's ifXTable.
#[derive(Debug, Clone)]
pub struct SnmpQuerier {
    community: Vec<u8>,
    port: u16,
    timeout: Duration,
}

impl SnmpQuerier {
    pub fn new(community: impl Into<Vec<u8>>, port: u16, timeout: Duration) -> Self {
        Self {
            community: community.into(),
            port,
            timeout,
        }
    }

    pub fn from_config(config: &SnmpConfig) -> Self {
        Self::new(
            config.community.as_bytes().to_vec(),
            config.port,
            config.query_timeout(),
        )
    }
}

#[async_trait]
impl InterfaceQuerier for SnmpQuerier {
    async fn query(&self, key: &CacheKey) -> Result<IfaceValue> {
        let target = SocketAddr::new(key.device, self.port);
        let community = self.community.clone();
        let timeout = self.timeout;
        let attribute = key.attribute;
        let oid = attribute.oid(key.ifindex);

        trace!(%key, "Sending SNMP GET");

        // The session socket is blocking; it is created and closed per query.
        let outcome = tokio::task::spawn_blocking(move || {
            snmp_get(target, &community, timeout, &oid, attribute)
        })
        .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(EnrichError::snmp(key.device, key.oid_string(), reason)),
            Err(join) => Err(EnrichError::snmp(
                key.device,
                key.oid_string(),
                join.to_string(),
            )),
        }
    }
}

fn snmp_get(
    target: SocketAddr,
    community: &[u8],
    timeout: Duration,
    oid: &[u32],
    attribute: IfaceAttribute,
) -> std::result::Result<IfaceValue, String> {
    let mut session = SyncSession::new(target, community, Some(timeout), 0)
        .map_err(|e| format!("connection error: {}", e))?;
    let mut response = session.get(oid).map_err(|e| format!("{:?}", e))?;

    if response.error_status != 0 {
        return Err(format!("agent error status {}", response.error_status));
    }

    let (_, value) = response
        .varbinds
        .next()
        .ok_or_else(|| "bad response: no variables".to_string())?;
    let decoded = decode(attribute, value)?;

    if response.varbinds.next().is_some() {
        return Err("bad response: more than one variable".to_string());
    }

    Ok(decoded)
}

fn decode(attribute: IfaceAttribute, value: Value<'_>) -> std::result::Result<IfaceValue, String> {
    match (attribute, value) {
        (IfaceAttribute::Name, Value::OctetString(bytes)) => {
            Ok(IfaceValue::Name(String::from_utf8_lossy(bytes).into_owned()))
        }
        (IfaceAttribute::Description, Value::OctetString(bytes)) => Ok(IfaceValue::Description(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        (IfaceAttribute::Speed, Value::Unsigned32(speed))
        | (IfaceAttribute::Speed, Value::Counter32(speed)) => Ok(IfaceValue::Speed(speed)),
        (IfaceAttribute::Speed, Value::Counter64(speed)) => {
            Ok(IfaceValue::Speed(u32::try_from(speed).unwrap_or(u32::MAX)))
        }
        (IfaceAttribute::Speed, Value::Integer(speed)) => u32::try_from(speed)
            .map(IfaceValue::Speed)
            .map_err(|_| format!("negative speed {}", speed)),
        (attribute, other) => Err(format!("unexpected {} value type: {:?}", attribute, other)),
    }
}
