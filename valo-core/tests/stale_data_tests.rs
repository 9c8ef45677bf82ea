//! Staleness surfacing: aged entries read as stale, are counted, and are
//! never evicted.

use std::sync::Arc;
use std::time::Duration;
use valo_core::cache::PriceCache;
use valo_core::core::{now_ns, AssetClass, Currency, PriceTick};
use valo_core::engine::{work_channel, DirtySet};
use valo_core::monitoring::ValoMetrics;

fn cache_with_threshold(threshold: Duration) -> (PriceCache, Arc<ValoMetrics>) {
    let metrics = Arc::new(ValoMetrics::new().unwrap());
    let (work, _rx) = work_channel(metrics.clone());
    let dirty = Arc::new(DirtySet::new(metrics.clone()));
    (
        PriceCache::new(threshold, work, dirty, metrics.clone()),
        metrics,
    )
}

fn tick_at(timestamp_ns: u64) -> PriceTick {
    PriceTick {
        product_id: 1,
        price: rust_decimal_macros::dec!(10),
        currency: Currency::USD,
        asset_class: AssetClass::Equity,
        source: "TEST".into(),
        source_priority: 1,
        timestamp_ns,
        stale: false,
    }
}

#[test]
fn tick_older_than_threshold_reads_stale() {
    // staleness.threshold.minutes = 1
    let (cache, metrics) = cache_with_threshold(Duration::from_secs(60));

    // Ingested at t0, read at t0 + 61s (timestamps carry the age)
    let t0 = now_ns() - Duration::from_secs(61).as_nanos() as u64;
    cache.put(tick_at(t0));

    let read = cache.get(1).unwrap();
    assert!(read.stale);

    // Scanner promotes and the gauge reflects it
    assert!(cache.scan_stale() >= 1);
    assert!(metrics.system().stale_price_entries.get() >= 1);

    // Stale means surfaced, not evicted
    assert_eq!(cache.len(), 1);
}

#[test]
fn fresh_tick_is_not_stale() {
    let (cache, metrics) = cache_with_threshold(Duration::from_secs(60));
    cache.put(tick_at(now_ns()));

    assert!(!cache.get(1).unwrap().stale);
    assert_eq!(cache.scan_stale(), 0);
    assert_eq!(metrics.system().stale_price_entries.get(), 0);
}

#[test]
fn promotion_is_one_way_until_refresh() {
    let (cache, _metrics) = cache_with_threshold(Duration::from_secs(60));
    let t0 = now_ns() - Duration::from_secs(120).as_nanos() as u64;
    cache.put(tick_at(t0));
    cache.scan_stale();

    // A fresh tick replaces the stale entry and clears the flag
    cache.put(tick_at(now_ns()));
    assert!(!cache.get(1).unwrap().stale);
    assert_eq!(cache.scan_stale(), 0);
}
