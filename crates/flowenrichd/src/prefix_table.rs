//! PrefixTable - longest-prefix match from IP prefixes to customer ids.
//!
//! Two independent binary tries are kept, one per address family, so an
//! IPv6 address can never match an IPv4 prefix and vice versa. The table is
//! built once at startup and is read-only afterwards; lookups take `&self`
//! and need no synchronization.

use crate::error::{EnrichError, Result};
use flow_types::{AddressFamily, IpPrefix};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Child slot value meaning "no child". The root lives at index 0 and is
/// never anybody's child, so 0 is free to use as the sentinel.
const NIL: u32 = 0;

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: [u32; 2],
    value: Option<u32>,
}

/// Arena-backed binary trie over left-aligned 128-bit keys.
#[derive(Debug, Clone)]
struct BitTrie {
    nodes: Vec<TrieNode>,
    width: u8,
    prefixes: usize,
}

#[inline]
fn bit_at(key: u128, depth: u8) -> usize {
    ((key >> (127 - u32::from(depth))) & 1) as usize
}

impl BitTrie {
    fn new(width: u8) -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            width,
            prefixes: 0,
        }
    }

    /// Stores `value` at the node reached after `prefix_len` bits of `key`,
    /// creating intermediate nodes as needed. Overwrites an existing value.
    fn insert(&mut self, key: u128, prefix_len: u8, value: u32) {
        let mut idx = 0usize;
        for depth in 0..prefix_len.min(self.width) {
            let bit = bit_at(key, depth);
            let child = self.nodes[idx].children[bit];
            idx = if child == NIL {
                let next = self.nodes.len() as u32;
                self.nodes.push(TrieNode::default());
                self.nodes[idx].children[bit] = next;
                next as usize
            } else {
                child as usize
            };
        }

        if self.nodes[idx].value.replace(value).is_none() {
            self.prefixes += 1;
        }
    }

    /// Walks `key` from the most significant bit and returns the value of
    /// the deepest node on the path that carries one.
    fn longest_match(&self, key: u128) -> Option<u32> {
        let mut idx = 0usize;
        let mut best = self.nodes[idx].value;

        for depth in 0..self.width {
            let child = self.nodes[idx].children[bit_at(key, depth)];
            if child == NIL {
                break;
            }
            idx = child as usize;
            if let Some(value) = self.nodes[idx].value {
                best = Some(value);
            }
        }

        best
    }
}

#[inline]
fn v4_key(v4: Ipv4Addr) -> u128 {
    u128::from(u32::from(v4)) << 96
}

/// Converts an address into a left-aligned trie key and its family.
///
/// IPv4-mapped IPv6 addresses are keyed into the IPv4 trie.
fn trie_key(addr: &IpAddr) -> (AddressFamily, u128) {
    let family = AddressFamily::of_addr(addr);
    let key = match (family, addr) {
        (_, IpAddr::V4(v4)) => v4_key(*v4),
        (AddressFamily::V4, IpAddr::V6(v6)) => v6.to_ipv4_mapped().map_or(0, v4_key),
        (AddressFamily::V6, IpAddr::V6(v6)) => u128::from(*v6),
    };
    (family, key)
}

/// Outcome of loading a prefix list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows inserted into either trie
    pub inserted: usize,
    /// Rows inserted into the IPv4 trie
    pub ipv4: usize,
    /// Rows inserted into the IPv6 trie
    pub ipv6: usize,
    /// Rows skipped for a missing field, bad prefix or bad customer id
    pub skipped: usize,
}

/// Longest-prefix match table mapping prefixes to customer ids.
#[derive(Debug, Clone)]
pub struct PrefixTable {
    v4: BitTrie,
    v6: BitTrie,
}

impl Default for PrefixTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            v4: BitTrie::new(32),
            v6: BitTrie::new(128),
        }
    }

    /// Inserts a prefix into the trie of its family.
    pub fn insert(&mut self, prefix: &IpPrefix, cid: u32) {
        let key = match prefix.address() {
            IpAddr::V4(v4) => v4_key(*v4),
            IpAddr::V6(v6) => u128::from(*v6),
        };
        match prefix.family() {
            AddressFamily::V4 => self.v4.insert(key, prefix.prefix_len(), cid),
            AddressFamily::V6 => self.v6.insert(key, prefix.prefix_len(), cid),
        }
    }

    /// Returns the customer id of the longest prefix containing `addr`.
    pub fn lookup(&self, addr: IpAddr) -> Option<u32> {
        let (family, key) = trie_key(&addr);
        match family {
            AddressFamily::V4 => self.v4.longest_match(key),
            AddressFamily::V6 => self.v6.longest_match(key),
        }
    }

    /// Resolves an address to a customer id, 0 meaning uncategorized.
    pub fn resolve(&self, addr: Option<IpAddr>) -> u32 {
        let Some(addr) = addr else {
            return 0;
        };
        match self.lookup(addr) {
            Some(cid) => cid,
            None => {
                debug!(address = %addr, "No prefix matched, customer id unset");
                0
            }
        }
    }

    /// Number of distinct prefixes in both tries.
    pub fn len(&self) -> usize {
        self.v4.prefixes + self.v6.prefixes
    }

    /// Returns true if no prefix has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct IPv4 prefixes.
    pub fn ipv4_count(&self) -> usize {
        self.v4.prefixes
    }

    /// Number of distinct IPv6 prefixes.
    pub fn ipv6_count(&self) -> usize {
        self.v6.prefixes
    }

    /// Inserts one `(prefix, cid)` row, returning the family it went to.
    fn insert_row(&mut self, prefix: &str, cid: &str) -> Option<AddressFamily> {
        let cid: u32 = cid.trim().parse().ok()?;
        let prefix: IpPrefix = prefix.parse().ok()?;
        self.insert(&prefix, cid);
        Some(prefix.family())
    }

    /// Builds a table from in-memory `(prefix, cid)` rows.
    ///
    /// Rows with an unparsable prefix or customer id are skipped.
    pub fn from_rows<I, P, C>(rows: I) -> (Self, LoadReport)
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: AsRef<str>,
    {
        let mut table = Self::new();
        let mut report = LoadReport::default();

        for (prefix, cid) in rows {
            table.record_row(&mut report, prefix.as_ref(), cid.as_ref());
        }

        (table, report)
    }

    fn record_row(&mut self, report: &mut LoadReport, prefix: &str, cid: &str) {
        match self.insert_row(prefix, cid) {
            Some(AddressFamily::V4) => {
                report.inserted += 1;
                report.ipv4 += 1;
            }
            Some(AddressFamily::V6) => {
                report.inserted += 1;
                report.ipv6 += 1;
            }
            None => {
                debug!(prefix, cid, "Skipping malformed prefix list row");
                report.skipped += 1;
            }
        }
    }

    /// Builds a table from headerless CSV `prefix,cid` rows.
    ///
    /// Lines starting with `#` are comments. Only I/O failures are errors;
    /// malformed rows are skipped and counted.
    pub fn from_reader<R: io::Read>(reader: R) -> std::result::Result<(Self, LoadReport), csv::Error> {
        let mut csv = csv_builder().from_reader(reader);
        Self::from_csv(&mut csv)
    }

    fn from_csv<R: io::Read>(
        csv: &mut csv::Reader<R>,
    ) -> std::result::Result<(Self, LoadReport), csv::Error> {
        let mut table = Self::new();
        let mut report = LoadReport::default();

        for record in csv.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable prefix list row");
                    report.skipped += 1;
                    continue;
                }
            };

            match (record.get(0), record.get(1)) {
                (Some(prefix), Some(cid)) => table.record_row(&mut report, prefix, cid),
                _ => report.skipped += 1,
            }
        }

        Ok((table, report))
    }

    /// Loads the prefix list CSV at `path`.
    ///
    /// Fails only if the file cannot be opened or read.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let to_error = |source| EnrichError::PrefixSource {
            path: path.to_path_buf(),
            source,
        };

        let mut csv = csv_builder().from_path(path).map_err(to_error)?;
        let (table, report) = Self::from_csv(&mut csv).map_err(to_error)?;

        info!(
            inserted = report.inserted,
            ipv4 = report.ipv4,
            ipv6 = report.ipv6,
            skipped = report.skipped,
            "Parsed prefix list"
        );

        Ok(table)
    }
}

fn csv_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'));
    builder
}
