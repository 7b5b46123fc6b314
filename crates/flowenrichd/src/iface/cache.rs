//! InterfaceMetadataCache - non-blocking, self-refreshing SNMP metadata cache.
//!
//! Every `(device, ifindex, attribute)` key moves through three states:
//!
//! ```text
//!   absent ──resolve──▶ pending ──query ok──▶ populated ──ttl──▶ absent
//!                          │                      ▲  │
//!                          └──ttl──▶ absent       └──┘ refresh ok (ttl reset)
//! ```
//!
//! `resolve` never waits on the network. A miss inserts the pending
//! placeholder under the map's shard lock and queues the key for the worker
//! pool, so at most one query per key is ever in flight. Workers and the
//! refresher share one semaphore bounding outstanding queries.

use crate::config::SnmpConfig;
use crate::error::{EnrichError, Result};
use crate::iface::querier::{InterfaceQuerier, SnmpQuerier};
use crate::iface::types::{CacheKey, IfaceAttribute, IfaceValue, InterfaceInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Tunables of the cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Lifetime of an entry after its last write
    pub ttl: Duration,
    /// Interval of the background refresh cycle
    pub refresh_interval: Duration,
    /// Outstanding query limit, also the worker pool size
    pub max_in_flight: usize,
    /// Capacity of the request queue
    pub queue_depth: usize,
    /// Applied to raw descriptions; the first capture group is kept
    pub ifdesc_regex: Regex,
}

impl CacheSettings {
    pub fn from_config(config: &SnmpConfig) -> Result<Self> {
        if config.cache_ttl().is_zero() || config.refresh_interval().is_zero() {
            return Err(EnrichError::config(
                "snmp cache ttl and refresh interval must be non-zero",
            ));
        }
        Ok(Self {
            ttl: config.cache_ttl(),
            refresh_interval: config.refresh_interval(),
            max_in_flight: config.max_in_flight.max(1),
            queue_depth: config.queue_depth.max(1),
            ifdesc_regex: config.compile_ifdesc_regex()?,
        })
    }
}

/// State of a live cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Query dispatched, no answer yet
    Pending,
    /// Last successfully retrieved value
    Populated(IfaceValue),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    state: EntryState,
    expires_at: Instant,
}

impl CacheEntry {
    fn pending(expires_at: Instant) -> Self {
        Self {
            state: EntryState::Pending,
            expires_at,
        }
    }

    fn populated(value: IfaceValue, expires_at: Instant) -> Self {
        Self {
            state: EntryState::Populated(value),
            expires_at,
        }
    }

    fn is_pending(&self) -> bool {
        self.state == EntryState::Pending
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    pending_hits: AtomicU64,
    misses: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    query_failures: AtomicU64,
}

/// Snapshot of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a populated entry
    pub hits: u64,
    /// Lookups that found a query already in flight
    pub pending_hits: u64,
    /// Lookups that had to dispatch a query
    pub misses: u64,
    /// Queries handed to the worker pool
    pub dispatched: u64,
    /// Queries not queued because the queue was full or closed
    pub dropped: u64,
    /// Failed client-triggered queries
    pub query_failures: u64,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Re-queried with an unchanged value, TTL extended
    pub refreshed: usize,
    /// Re-queried with a new value, replaced
    pub updated: usize,
    /// Pending entries left alone
    pub skipped_pending: usize,
    /// Re-query failed, entry left to age
    pub failed: usize,
    /// Expired entries swept before the cycle
    pub expired: usize,
}

/// Applies the description regex: the first capture group replaces the raw
/// value when the pattern has one and matches, otherwise the raw value stays.
pub fn truncate_description(regex: &Regex, raw: String) -> String {
    match regex.captures(&raw) {
        Some(caps) if caps.len() > 1 => caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        _ => raw,
    }
}

/// TTL cache of interface name, description and speed per device.
pub struct InterfaceMetadataCache {
    entries: DashMap<CacheKey, CacheEntry>,
    querier: Arc<dyn InterfaceQuerier>,
    gate: Semaphore,
    settings: CacheSettings,
    counters: Counters,
    requests: mpsc::Sender<CacheKey>,
    receiver: Mutex<Option<mpsc::Receiver<CacheKey>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for InterfaceMetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceMetadataCache")
            .field("entries", &self.entries.len())
            .field("settings", &self.settings)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl InterfaceMetadataCache {
    /// Creates a cache. Lookups may start right away; queued queries run
    /// once [`start`](Self::start) has been called.
    pub fn new(settings: CacheSettings, querier: Arc<dyn InterfaceQuerier>) -> Arc<Self> {
        let (requests, receiver) = mpsc::channel(settings.queue_depth);
        Arc::new(Self {
            entries: DashMap::new(),
            querier,
            gate: Semaphore::new(settings.max_in_flight),
            settings,
            counters: Counters::default(),
            requests,
            receiver: Mutex::new(Some(receiver)),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Creates a cache backed by SNMP from the `[snmp]` configuration.
    pub fn from_config(config: &SnmpConfig) -> Result<Arc<Self>> {
        let settings = CacheSettings::from_config(config)?;
        Ok(Self::new(settings, Arc::new(SnmpQuerier::from_config(config))))
    }

    /// Spawns the worker pool and the periodic refresher on the current
    /// Tokio runtime. Calls after the first are no-ops.
    #[instrument(skip(self), fields(workers = self.settings.max_in_flight))]
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EnrichError::config("interface metadata cache must be started inside a Tokio runtime")
        })?;

        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Interface metadata cache already started");
            return Ok(());
        }

        let Some(receiver) = self.receiver.lock().take() else {
            return Ok(());
        };
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for _ in 0..self.settings.max_in_flight {
            let cache = Arc::clone(self);
            let receiver = Arc::clone(&receiver);
            self.tasks.spawn_on(cache.worker(receiver), &handle);
        }

        let cache = Arc::clone(self);
        self.tasks.spawn_on(cache.refresh_loop(), &handle);

        info!(
            ttl_secs = self.settings.ttl.as_secs(),
            refresh_secs = self.settings.refresh_interval.as_secs(),
            "Interface metadata cache started"
        );
        Ok(())
    }

    /// Stops the workers and the refresher. Queries already on the wire
    /// finish within their transport timeout; queued ones are abandoned.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Interface metadata cache stopped");
    }

    /// Returns name, description and speed of an interface.
    ///
    /// Never blocks. Attributes not yet known come back empty/zero and a
    /// query for them is dispatched unless one is already in flight.
    pub fn resolve(&self, device: IpAddr, ifindex: u32) -> InterfaceInfo {
        let mut info = InterfaceInfo::default();
        for attribute in IfaceAttribute::ALL {
            if let Some(value) = self.lookup_or_dispatch(CacheKey::new(device, ifindex, attribute)) {
                info.set(value);
            }
        }
        info
    }

    fn lookup_or_dispatch(&self, key: CacheKey) -> Option<IfaceValue> {
        let now = Instant::now();
        let placeholder = CacheEntry::pending(now + self.settings.ttl);

        match self.entries.entry(key) {
            Entry::Occupied(occupied) if occupied.get().expires_at > now => {
                return match &occupied.get().state {
                    EntryState::Populated(value) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        Some(value.clone())
                    }
                    EntryState::Pending => {
                        self.counters.pending_hits.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                };
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(placeholder);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(placeholder);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.dispatch(key);
        None
    }

    fn dispatch(&self, key: CacheKey) {
        match self.requests.try_send(key) {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(key)) | Err(TrySendError::Closed(key)) => {
                // Withdraw the placeholder so the next miss tries again.
                self.entries.remove_if(&key, |_, entry| entry.is_pending());
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "Interface query queue unavailable, request dropped");
            }
        }
    }

    /// Issues one query under a gate permit and post-processes the value.
    async fn fetch(&self, key: &CacheKey) -> Result<IfaceValue> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| EnrichError::QueueClosed)?;
        let result = self.querier.query(key).await;
        drop(permit);

        Ok(match result? {
            IfaceValue::Description(raw) => {
                IfaceValue::Description(truncate_description(&self.settings.ifdesc_regex, raw))
            }
            other => other,
        })
    }

    async fn worker(self: Arc<Self>, receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<CacheKey>>>) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = async { receiver.lock().await.recv().await } => next,
            };
            let Some(key) = next else {
                break;
            };

            match self.fetch(&key).await {
                Ok(value) => {
                    self.insert(key, value);
                }
                Err(e) => {
                    // Entry stays pending until it ages out.
                    self.counters.query_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%key, error = %e, "Interface query failed");
                }
            }
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        info!("SNMP refresh: Started");
        let period = self.settings.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            info!(items = self.len(), "SNMP refresh: Starting run");
            let report = self.refresh_once().await;
            let stats = self.stats();
            info!(
                refreshed = report.refreshed,
                updated = report.updated,
                skipped_pending = report.skipped_pending,
                failed = report.failed,
                expired = report.expired,
                hits = stats.hits,
                misses = stats.misses,
                query_failures = stats.query_failures,
                "SNMP refresh: Finished run"
            );
        }
    }

    /// Runs one refresh cycle over every entry present at its start.
    ///
    /// Populated entries are re-queried; an unchanged answer only extends
    /// the TTL, a changed one replaces the value. Pending entries and
    /// failed re-queries are left as they are.
    pub async fn refresh_once(&self) -> RefreshReport {
        let mut report = RefreshReport {
            expired: self.purge_expired(),
            ..Default::default()
        };

        let snapshot: Vec<(CacheKey, EntryState)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().state.clone()))
            .collect();

        for (key, state) in snapshot {
            if self.shutdown.is_cancelled() {
                break;
            }

            let EntryState::Populated(current) = state else {
                debug!(%key, "SNMP refresh: Found pending key, initial query outstanding");
                report.skipped_pending += 1;
                continue;
            };

            match self.fetch(&key).await {
                Ok(fresh) if fresh == current => {
                    if let Some(mut entry) = self.entries.get_mut(&key) {
                        entry.expires_at = Instant::now() + self.settings.ttl;
                    } else {
                        self.insert(key, fresh);
                    }
                    report.refreshed += 1;
                }
                Ok(fresh) => {
                    self.insert(key, fresh);
                    report.updated += 1;
                    info!(%key, oid = %key.oid_string(), "SNMP refresh: Updated");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(%key, error = %e, "SNMP refresh: Query failed");
                }
            }
        }

        report
    }

    /// Removes expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Stores a value as populated with a fresh TTL, replacing any entry.
    pub fn insert(&self, key: CacheKey, value: IfaceValue) {
        let expires_at = Instant::now() + self.settings.ttl;
        self.entries
            .insert(key, CacheEntry::populated(value, expires_at));
    }

    /// Current state of a key, `None` if absent or expired.
    pub fn state(&self, key: &CacheKey) -> Option<EntryState> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.state.clone())
    }

    /// Expiry deadline of a key, if present.
    pub fn expires_at(&self, key: &CacheKey) -> Option<Instant> {
        self.entries.get(key).map(|entry| entry.expires_at)
    }

    /// Number of entries, including pending and not yet swept ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            pending_hits: c.pending_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            query_failures: c.query_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// Answers every query from a fixed table.
    struct FixedQuerier {
        calls: AtomicUsize,
        speed: AtomicU64,
        fail: AtomicBool,
    }

    impl FixedQuerier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                speed: AtomicU64::new(10000),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl InterfaceQuerier for FixedQuerier {
        async fn query(&self, key: &CacheKey) -> Result<IfaceValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(EnrichError::snmp(key.device, key.oid_string(), "timeout"));
            }
            Ok(match key.attribute {
                IfaceAttribute::Name => IfaceValue::Name(format!("Ethernet{}", key.ifindex)),
                IfaceAttribute::Description => {
                    IfaceValue::Description("_abc_12345_67890_ AS64500 Peering Link (backup)".into())
                }
                IfaceAttribute::Speed => {
                    IfaceValue::Speed(self.speed.load(Ordering::SeqCst) as u32)
                }
            })
        }
    }

    fn settings(pattern: &str) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(3 * 3600),
            refresh_interval: Duration::from_secs(3600),
            max_in_flight: 4,
            queue_depth: 64,
            ifdesc_regex: Regex::new(pattern).unwrap(),
        }
    }

    fn device() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    #[test]
    fn test_settings_reject_zero_durations() {
        let mut config = SnmpConfig::default();
        config.refresh_interval_secs = 0;
        assert!(matches!(
            CacheSettings::from_config(&config),
            Err(EnrichError::Config(_))
        ));

        let mut config = SnmpConfig::default();
        config.cache_ttl_secs = 0;
        assert!(matches!(
            CacheSettings::from_config(&config),
            Err(EnrichError::Config(_))
        ));

        assert!(CacheSettings::from_config(&SnmpConfig::default()).is_ok());
    }

    #[test]
    fn test_truncate_description_capture_group() {
        let regex = Regex::new(r"^_[a-z]{3}_[0-9]{5}_[0-9]{5}_ [A-Z0-9]+ (.*?) *( \(.*)?$").unwrap();
        assert_eq!(
            truncate_description(&regex, "_abc_12345_67890_ AS64500 Peering Link (backup)".into()),
            "Peering Link"
        );
    }

    #[test]
    fn test_truncate_description_no_match_keeps_raw() {
        let regex = Regex::new(r"^core-(\S+)$").unwrap();
        assert_eq!(
            truncate_description(&regex, "uplink to transit".into()),
            "uplink to transit"
        );
    }

    #[test]
    fn test_truncate_description_without_group_keeps_raw() {
        let regex = Regex::new(r"uplink").unwrap();
        assert_eq!(
            truncate_description(&regex, "uplink to transit".into()),
            "uplink to transit"
        );
    }

    #[tokio::test]
    async fn test_first_resolve_is_empty_and_marks_pending() {
        let querier = FixedQuerier::new();
        let cache = InterfaceMetadataCache::new(settings("(.*)"), querier.clone());

        let info = cache.resolve(device(), 3);
        assert_eq!(info, InterfaceInfo::default());
        assert_eq!(cache.len(), 3);

        let key = CacheKey::new(device(), 3, IfaceAttribute::Name);
        assert_eq!(cache.state(&key), Some(EntryState::Pending));

        // Not started: nothing has been queried yet
        assert_eq!(querier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().dispatched, 3);
    }

    #[tokio::test]
    async fn test_pending_key_is_not_dispatched_twice() {
        let cache = InterfaceMetadataCache::new(settings("(.*)"), FixedQuerier::new());

        cache.resolve(device(), 3);
        cache.resolve(device(), 3);

        let stats = cache.stats();
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.pending_hits, 3);
        assert_eq!(stats.dispatched, 3);
    }

    #[tokio::test]
    async fn test_full_queue_withdraws_placeholder() {
        let mut small = settings("(.*)");
        small.queue_depth = 1;
        let cache = InterfaceMetadataCache::new(small, FixedQuerier::new());

        cache.resolve(device(), 3);

        let stats = cache.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_skips_pending() {
        let querier = FixedQuerier::new();
        let cache = InterfaceMetadataCache::new(settings("(.*)"), querier.clone());

        cache.resolve(device(), 3);
        let report = cache.refresh_once().await;

        assert_eq!(report.skipped_pending, 3);
        assert_eq!(report.refreshed, 0);
        assert_eq!(querier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_unchanged_extends_ttl() {
        let cache = InterfaceMetadataCache::new(settings("(.*)"), FixedQuerier::new());
        let key = CacheKey::new(device(), 3, IfaceAttribute::Speed);

        cache.insert(key, IfaceValue::Speed(10000));
        let before = cache.expires_at(&key).unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;
        let report = cache.refresh_once().await;

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(
            cache.state(&key),
            Some(EntryState::Populated(IfaceValue::Speed(10000)))
        );
        assert!(cache.expires_at(&key).unwrap() > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_changed_value_replaces() {
        let querier = FixedQuerier::new();
        let cache = InterfaceMetadataCache::new(settings("(.*)"), querier.clone());
        let key = CacheKey::new(device(), 3, IfaceAttribute::Speed);

        cache.insert(key, IfaceValue::Speed(10000));
        querier.speed.store(100000, Ordering::SeqCst);

        let report = cache.refresh_once().await;
        assert_eq!(report.updated, 1);
        assert_eq!(
            cache.state(&key),
            Some(EntryState::Populated(IfaceValue::Speed(100000)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_leaves_entry_to_age() {
        let querier = FixedQuerier::new();
        let cache = InterfaceMetadataCache::new(settings("(.*)"), querier.clone());
        let key = CacheKey::new(device(), 3, IfaceAttribute::Name);

        cache.insert(key, IfaceValue::Name("Ethernet3".into()));
        let before = cache.expires_at(&key).unwrap();
        querier.fail.store(true, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(600)).await;
        let report = cache.refresh_once().await;

        assert_eq!(report.failed, 1);
        assert_eq!(cache.expires_at(&key), Some(before));
        assert_eq!(
            cache.state(&key),
            Some(EntryState::Populated(IfaceValue::Name("Ethernet3".into())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_swept_and_requeried() {
        let cache = InterfaceMetadataCache::new(settings("(.*)"), FixedQuerier::new());
        let key = CacheKey::new(device(), 3, IfaceAttribute::Name);

        cache.insert(key, IfaceValue::Name("Ethernet3".into()));
        tokio::time::advance(Duration::from_secs(3 * 3600 + 1)).await;

        assert_eq!(cache.state(&key), None);

        // An expired entry counts as a miss and is replaced by a placeholder
        let info = cache.resolve(device(), 3);
        assert!(info.name.is_empty());
        assert_eq!(cache.state(&key), Some(EntryState::Pending));
        assert_eq!(cache.stats().misses, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = InterfaceMetadataCache::new(settings("(.*)"), FixedQuerier::new());
        cache.insert(
            CacheKey::new(device(), 3, IfaceAttribute::Name),
            IfaceValue::Name("Ethernet3".into()),
        );
        tokio::time::advance(Duration::from_secs(3 * 3600 + 1)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let cache = InterfaceMetadataCache::new(settings("(.*)"), FixedQuerier::new());
        cache.start().unwrap();
        cache.start().unwrap();
        cache.shutdown().await;
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let cache = InterfaceMetadataCache::new(settings("(.*)"), FixedQuerier::new());
        assert!(matches!(cache.start(), Err(EnrichError::Config(_))));
    }
}
