//! Type definitions for interface metadata lookups

use std::fmt;
use std::net::IpAddr;

/// ifXTable (IF-MIB) column prefix, `.1.3.6.1.2.1.31.1.1.1`
pub const IFX_ENTRY_OID: [u32; 10] = [1, 3, 6, 1, 2, 1, 31, 1, 1, 1];

/// An interface attribute resolved over SNMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfaceAttribute {
    /// ifName, e.g. `TenGigE0/0/0/3`
    Name,
    /// ifAlias, the operator-assigned description
    Description,
    /// ifHighSpeed in Mbit/s
    Speed,
}

impl IfaceAttribute {
    /// All attributes, in resolution order
    pub const ALL: [IfaceAttribute; 3] = [
        IfaceAttribute::Name,
        IfaceAttribute::Description,
        IfaceAttribute::Speed,
    ];

    /// ifXTable column number of this attribute
    pub const fn column(&self) -> u32 {
        match self {
            IfaceAttribute::Name => 1,
            IfaceAttribute::Speed => 15,
            IfaceAttribute::Description => 18,
        }
    }

    /// Full OID of this attribute for interface `ifindex`
    pub fn oid(&self, ifindex: u32) -> Vec<u32> {
        let mut oid = IFX_ENTRY_OID.to_vec();
        oid.push(self.column());
        oid.push(ifindex);
        oid
    }

    /// Dotted OID string, for logs
    pub fn oid_string(&self, ifindex: u32) -> String {
        self.oid(ifindex)
            .iter()
            .map(|arc| format!(".{}", arc))
            .collect()
    }
}

impl fmt::Display for IfaceAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IfaceAttribute::Name => f.write_str("name"),
            IfaceAttribute::Description => f.write_str("desc"),
            IfaceAttribute::Speed => f.write_str("speed"),
        }
    }
}

/// A resolved attribute value, one variant per attribute kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfaceValue {
    Name(String),
    Description(String),
    Speed(u32),
}

/// Cache key: one attribute of one interface of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub device: IpAddr,
    pub ifindex: u32,
    pub attribute: IfaceAttribute,
}

impl CacheKey {
    pub fn new(device: IpAddr, ifindex: u32, attribute: IfaceAttribute) -> Self {
        Self {
            device,
            ifindex,
            attribute,
        }
    }

    /// Dotted OID string of this key's query
    pub fn oid_string(&self) -> String {
        self.attribute.oid_string(self.ifindex)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.device, self.ifindex, self.attribute)
    }
}

/// Interface metadata as seen by one `resolve` call.
///
/// Attributes whose query has not been answered yet are empty/zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub speed: u32,
}

impl InterfaceInfo {
    /// Returns true if all three attributes are known.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.description.is_empty() && self.speed > 0
    }

    pub(crate) fn set(&mut self, value: IfaceValue) {
        match value {
            IfaceValue::Name(name) => self.name = name,
            IfaceValue::Description(description) => self.description = description,
            IfaceValue::Speed(speed) => self.speed = speed,
        }
    }
}
