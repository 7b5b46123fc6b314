//! Common types for network flow enrichment.
//!
//! This crate provides the value types exchanged between the enricher and
//! its transports:
//!
//! - [`FlowRecord`]: a single flow telemetry record, mutated in place by enrichment
//! - [`FlowDirection`]: typed view of the record's direction tag
//! - [`IpPrefix`]: IP network prefixes (CIDR notation)
//! - [`AddressFamily`]: IPv4/IPv6 discrimination for prefix tables

mod flow;
mod ip;

pub use flow::{FlowDirection, FlowRecord};
pub use ip::{AddressFamily, IpPrefix};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
