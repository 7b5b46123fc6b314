//! Interface metadata cache behaviour under a live worker pool.

use async_trait::async_trait;
use flowenrichd::iface::{
    CacheKey, CacheSettings, EntryState, IfaceAttribute, IfaceValue, InterfaceMetadataCache,
    InterfaceQuerier,
};
use flowenrichd::{EnrichError, Result};
use pretty_assertions::assert_eq;
use regex::Regex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Blocks every query until permits are added to `gate`.
struct GatedQuerier {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    speed: AtomicU32,
    gate: Semaphore,
}

impl GatedQuerier {
    fn closed() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            speed: AtomicU32::new(10000),
            gate: Semaphore::new(0),
        })
    }

    fn open() -> Arc<Self> {
        let querier = Self::closed();
        querier.release();
        querier
    }

    fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterfaceQuerier for GatedQuerier {
    async fn query(&self, key: &CacheKey) -> Result<IfaceValue> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await.map_err(|_| EnrichError::QueueClosed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(permit?);

        Ok(match key.attribute {
            IfaceAttribute::Name => IfaceValue::Name(format!("TenGigE0/0/0/{}", key.ifindex)),
            IfaceAttribute::Description => IfaceValue::Description(
                "_abc_12345_67890_ AS64500 Telia Sonera (provider line codes)".to_string(),
            ),
            IfaceAttribute::Speed => IfaceValue::Speed(self.speed.load(Ordering::SeqCst)),
        })
    }
}

fn settings(max_in_flight: usize) -> CacheSettings {
    CacheSettings {
        ttl: Duration::from_secs(3 * 3600),
        refresh_interval: Duration::from_secs(3600),
        max_in_flight,
        queue_depth: 4096,
        ifdesc_regex: Regex::new(r"^_[a-z]{3}_[0-9]{5}_[0-9]{5}_ [A-Z0-9]+ (.*?) *( \(.*)?$")
            .unwrap(),
    }
}

fn device() -> IpAddr {
    "192.0.2.1".parse().unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

fn all_populated(cache: &InterfaceMetadataCache, ifindex: u32) -> bool {
    IfaceAttribute::ALL.iter().all(|attribute| {
        matches!(
            cache.state(&CacheKey::new(device(), ifindex, *attribute)),
            Some(EntryState::Populated(_))
        )
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_dispatch_once() {
    let querier = GatedQuerier::closed();
    let cache = InterfaceMetadataCache::new(settings(8), querier.clone());
    cache.start().unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve(device(), 3) })
        })
        .collect();
    for handle in handles {
        let info = handle.await.unwrap();
        assert!(info.name.is_empty());
        assert_eq!(info.speed, 0);
    }

    // One query per attribute, all parked on the gate
    wait_until(|| querier.calls() == 3).await;
    let stats = cache.stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.pending_hits, 16 * 3 - 3);

    querier.release();
    wait_until(|| all_populated(&cache, 3)).await;
    assert_eq!(querier.calls(), 3);

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resolve_converges_without_redispatch() {
    let querier = GatedQuerier::open();
    let cache = InterfaceMetadataCache::new(settings(4), querier.clone());
    cache.start().unwrap();

    cache.resolve(device(), 3);
    wait_until(|| all_populated(&cache, 3)).await;

    let info = cache.resolve(device(), 3);
    assert_eq!(info.name, "TenGigE0/0/0/3");
    assert_eq!(info.description, "Telia Sonera");
    assert_eq!(info.speed, 10000);
    assert!(info.is_complete());

    assert_eq!(querier.calls(), 3);
    assert_eq!(cache.stats().hits, 3);

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gate_bounds_outstanding_queries() {
    let querier = GatedQuerier::closed();
    let cache = InterfaceMetadataCache::new(settings(2), querier.clone());
    cache.start().unwrap();

    for ifindex in 1..=10 {
        cache.resolve(device(), ifindex);
    }

    wait_until(|| querier.calls() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(querier.calls(), 2);

    querier.release();
    wait_until(|| (1..=10).all(|ifindex| all_populated(&cache, ifindex))).await;
    assert_eq!(querier.calls(), 30);
    assert!(querier.max_in_flight.load(Ordering::SeqCst) <= 2);

    cache.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh_picks_up_changes() {
    let querier = GatedQuerier::open();
    let cache = InterfaceMetadataCache::new(settings(4), querier.clone());
    cache.start().unwrap();

    let key = CacheKey::new(device(), 3, IfaceAttribute::Speed);
    cache.insert(key, IfaceValue::Speed(10000));
    let inserted_expiry = cache.expires_at(&key).unwrap();

    querier.speed.store(100000, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3600 + 1)).await;

    assert_eq!(
        cache.state(&key),
        Some(EntryState::Populated(IfaceValue::Speed(100000)))
    );
    assert!(cache.expires_at(&key).unwrap() > inserted_expiry);
    assert_eq!(querier.calls(), 1);

    cache.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unrefreshed_entry_ages_out() {
    let querier = GatedQuerier::closed();
    let cache = InterfaceMetadataCache::new(settings(4), querier.clone());

    let key = CacheKey::new(device(), 3, IfaceAttribute::Name);
    cache.insert(key, IfaceValue::Name("TenGigE0/0/0/3".into()));

    tokio::time::advance(Duration::from_secs(2 * 3600)).await;
    assert!(cache.state(&key).is_some());

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(cache.state(&key), None);

    let report = cache.refresh_once().await;
    assert_eq!(report.expired, 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let querier = GatedQuerier::open();
    let cache = InterfaceMetadataCache::new(settings(4), querier.clone());
    cache.start().unwrap();
    cache.shutdown().await;

    // Requests are still accepted but nobody serves them
    cache.resolve(device(), 3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(querier.calls(), 0);
}
