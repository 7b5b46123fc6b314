//! Flow record representation.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Direction in which a flow was observed at the exporting interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    /// Traffic entering the observation point (wire value 0)
    Ingress,
    /// Traffic leaving the observation point (wire value 1)
    Egress,
    /// Any other wire value
    Unknown(u32),
}

impl From<u32> for FlowDirection {
    fn from(value: u32) -> Self {
        match value {
            0 => FlowDirection::Ingress,
            1 => FlowDirection::Egress,
            other => FlowDirection::Unknown(other),
        }
    }
}

impl From<FlowDirection> for u32 {
    fn from(direction: FlowDirection) -> Self {
        match direction {
            FlowDirection::Ingress => 0,
            FlowDirection::Egress => 1,
            FlowDirection::Unknown(other) => other,
        }
    }
}

/// A single flow telemetry record.
///
/// Input fields are filled by the flow collector; the enrichment output
/// fields start out zeroed and are written in place by the enricher.
/// Every field is optional on the wire and defaults to its zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRecord {
    /// Source address of the flow
    pub src_addr: Option<IpAddr>,
    /// Destination address of the flow
    pub dst_addr: Option<IpAddr>,
    /// Raw direction tag, see [`FlowDirection`]
    pub flow_direction: u32,
    /// Byte counter (sampled unless `normalized` is set)
    pub bytes: u64,
    /// Packet counter (sampled unless `normalized` is set)
    pub packets: u64,
    /// One-in-N sampling rate, 0 if unknown
    pub sampling_rate: u64,
    /// IP protocol number
    pub proto: u32,
    /// Address of the exporting device
    pub sampler_address: Option<IpAddr>,
    /// Ingress interface index, 0 if unknown
    pub in_if: u32,
    /// Egress interface index, 0 if unknown
    pub out_if: u32,

    /// Customer id of the local address, 0 if uncategorized
    pub cid: u32,
    /// ISO country code of the remote address
    pub remote_country: String,
    /// Well-known protocol name
    pub proto_name: String,
    /// Counters have been scaled by the sampling rate
    pub normalized: bool,
    pub src_if_name: String,
    pub src_if_desc: String,
    pub src_if_speed: u32,
    pub dst_if_name: String,
    pub dst_if_desc: String,
    pub dst_if_speed: u32,
}

impl FlowRecord {
    /// Returns the typed direction tag.
    pub fn direction(&self) -> FlowDirection {
        FlowDirection::from(self.flow_direction)
    }

    /// Returns the `(local, remote)` addresses of this flow.
    ///
    /// The exporting interface is assumed to be a border interface, so
    /// ingress flows are local at their destination and egress flows are
    /// local at their source. Unknown directions yield neither.
    pub fn endpoints(&self) -> (Option<IpAddr>, Option<IpAddr>) {
        match self.direction() {
            FlowDirection::Ingress => (self.dst_addr, self.src_addr),
            FlowDirection::Egress => (self.src_addr, self.dst_addr),
            FlowDirection::Unknown(_) => (None, None),
        }
    }
}
