//! IP prefix type with safe parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of a prefix or address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Infers the family of an address literal by inspecting its syntax.
    ///
    /// A `:` anywhere means IPv6, otherwise a `.` means IPv4. Returns `None`
    /// when neither separator is present.
    pub fn of_literal(s: &str) -> Option<Self> {
        if s.contains(':') {
            Some(AddressFamily::V6)
        } else if s.contains('.') {
            Some(AddressFamily::V4)
        } else {
            None
        }
    }

    /// Returns the family of a parsed address.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are reported as IPv4.
    pub fn of_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Width of an address of this family in bits.
    pub const fn bits(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.0/24 or 2001:db8::/32).
///
/// Host bits beyond the prefix length are kept as written; consumers that
/// only look at the first `prefix_len` bits are unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = Self::family_of(&address).bits();

        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    /// Creates a host prefix (/32 or /128) covering exactly one address.
    pub fn host(address: IpAddr) -> Self {
        IpPrefix {
            address,
            prefix_len: Self::family_of(&address).bits(),
        }
    }

    const fn family_of(address: &IpAddr) -> AddressFamily {
        match address {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Returns the network address of this prefix.
    pub const fn address(&self) -> &IpAddr {
        &self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the address family as written.
    pub const fn family(&self) -> AddressFamily {
        Self::family_of(&self.address)
    }

    /// Returns true if this is an IPv4 prefix.
    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// Returns true if this is an IPv6 prefix.
    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// Returns true if this is a host route (/32 for IPv4, /128 for IPv6).
    pub const fn is_host_route(&self) -> bool {
        match self.address {
            IpAddr::V4(_) => self.prefix_len == 32,
            IpAddr::V6(_) => self.prefix_len == 128,
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

fn parse_literal(s: &str) -> Result<IpAddr, ParseError> {
    let invalid = || ParseError::InvalidIpAddress(s.to_string());
    match AddressFamily::of_literal(s).ok_or_else(invalid)? {
        AddressFamily::V6 => s.parse::<Ipv6Addr>().map(IpAddr::V6).map_err(|_| invalid()),
        AddressFamily::V4 => s.parse::<Ipv4Addr>().map(IpAddr::V4).map_err(|_| invalid()),
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    /// Parses `addr/len`, or a bare address as a host prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((addr_str, len_str)) = s.rsplit_once('/') else {
            return parse_literal(s).map(IpPrefix::host);
        };

        let address = parse_literal(addr_str)?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}
