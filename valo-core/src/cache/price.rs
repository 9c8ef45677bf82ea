//! Price hot cache: product -> latest winning tick.
//!
//! `put` is the single source of change notifications: when a stored entry is
//! replaced, the cache enqueues the product on the valuation work queue and
//! marks it dirty for persistence. Entries past the staleness threshold are
//! surfaced as stale on read but never evicted.

use crate::core::{now_ns, PriceTick, ProductId, TimestampNs};
use crate::engine::persistence::DirtySet;
use crate::engine::valuation::WorkSender;
use crate::monitoring::ValoMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub struct PriceCache {
    entries: DashMap<ProductId, PriceTick>,
    staleness_threshold_ns: u64,
    work: WorkSender,
    dirty: Arc<DirtySet>,
    metrics: Arc<ValoMetrics>,
}

impl PriceCache {
    pub fn new(
        staleness_threshold: Duration,
        work: WorkSender,
        dirty: Arc<DirtySet>,
        metrics: Arc<ValoMetrics>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            staleness_threshold_ns: staleness_threshold.as_nanos() as u64,
            work,
            dirty,
            metrics,
        }
    }

    /// Store `tick` if it supersedes the cached entry.
    ///
    /// Returns true when the entry changed; the product is then enqueued for
    /// revaluation and marked dirty for persistence.
    pub fn put(&self, tick: PriceTick) -> bool {
        let product_id = tick.product_id;
        let now = now_ns();

        let stored = match self.entries.entry(product_id) {
            Entry::Occupied(mut occupied) => {
                if self.supersedes(&tick, occupied.get(), now) {
                    occupied.insert(tick);
                    true
                } else {
                    trace!(product_id, "tick did not supersede cached entry");
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tick);
                true
            }
        };

        // Entry guard is dropped; notify outside the shard lock
        if stored {
            self.metrics
                .system()
                .price_cache_size
                .set(self.entries.len() as i64);
            self.dirty.mark(product_id);
            self.work.enqueue(product_id);
        }
        stored
    }

    /// Supersession law: strictly newer timestamp wins; equal timestamps
    /// resolve by higher quality (lower priority value); anything replaces an
    /// entry past the staleness threshold.
    fn supersedes(&self, new: &PriceTick, cached: &PriceTick, now: TimestampNs) -> bool {
        if new.timestamp_ns > cached.timestamp_ns {
            return true;
        }
        if new.timestamp_ns == cached.timestamp_ns
            && new.source_priority < cached.source_priority
        {
            return true;
        }
        cached.age_ns(now) > self.staleness_threshold_ns
    }

    /// Latest tick for `product_id`, with `stale` set from the entry's age.
    pub fn get(&self, product_id: ProductId) -> Option<PriceTick> {
        let now = now_ns();
        self.entries.get(&product_id).map(|entry| {
            let mut tick = entry.value().clone();
            if tick.age_ns(now) > self.staleness_threshold_ns {
                tick.stale = true;
            }
            tick
        })
    }

    /// Ticks for every id that has one.
    pub fn bulk_get(&self, ids: &[ProductId]) -> HashMap<ProductId, PriceTick> {
        ids.iter()
            .filter_map(|id| self.get(*id).map(|tick| (*id, tick)))
            .collect()
    }

    /// Promote aged entries to stale in place and refresh the stale gauge.
    ///
    /// Returns the number of entries currently stale.
    pub fn scan_stale(&self) -> usize {
        let now = now_ns();
        let mut stale = 0usize;
        for mut entry in self.entries.iter_mut() {
            let tick = entry.value_mut();
            if tick.age_ns(now) > self.staleness_threshold_ns {
                tick.stale = true;
            }
            if tick.stale {
                stale += 1;
            }
        }
        self.metrics
            .system()
            .stale_price_entries
            .set(stale as i64);
        stale
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AssetClass, Currency};
    use crate::engine::valuation::work_channel;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn harness(threshold: Duration) -> (PriceCache, crossbeam::channel::Receiver<crate::core::WorkItem>) {
        let metrics = Arc::new(ValoMetrics::new().unwrap());
        let (work, rx) = work_channel(metrics.clone());
        let dirty = Arc::new(DirtySet::new(metrics.clone()));
        (PriceCache::new(threshold, work, dirty, metrics), rx)
    }

    fn tick(product_id: ProductId, price: Decimal, priority: u8, timestamp_ns: u64) -> PriceTick {
        PriceTick {
            product_id,
            price,
            currency: Currency::USD,
            asset_class: AssetClass::Equity,
            source: "TEST".into(),
            source_priority: priority,
            timestamp_ns,
            stale: false,
        }
    }

    #[test]
    fn newer_timestamp_wins() {
        let (cache, rx) = harness(Duration::from_secs(1_800));
        let base = now_ns();

        assert!(cache.put(tick(1, Decimal::from(10), 1, base)));
        assert!(cache.put(tick(1, Decimal::from(11), 5, base + 1)));
        assert_eq!(cache.get(1).unwrap().price, Decimal::from(11));

        // Older tick loses regardless of priority
        assert!(!cache.put(tick(1, Decimal::from(9), 1, base)));
        assert_eq!(cache.get(1).unwrap().price, Decimal::from(11));

        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn equal_timestamp_resolves_by_priority() {
        let (cache, _rx) = harness(Duration::from_secs(1_800));
        let base = now_ns();

        cache.put(tick(1, Decimal::from(10), 3, base));
        assert!(cache.put(tick(1, Decimal::from(11), 1, base)));
        assert_eq!(cache.get(1).unwrap().price, Decimal::from(11));

        // Same priority, same timestamp: presumed identical, no replacement
        assert!(!cache.put(tick(1, Decimal::from(12), 1, base)));
        assert_eq!(cache.get(1).unwrap().price, Decimal::from(11));
    }

    #[test]
    fn stale_entry_accepts_any_refresh() {
        let (cache, _rx) = harness(Duration::from_nanos(1));
        let old = now_ns() - 1_000_000;

        cache.put(tick(1, Decimal::from(10), 1, old));
        // Out-of-order, lower-quality, but the cached entry is stale
        assert!(cache.put(tick(1, Decimal::from(11), 9, old - 5)));
        assert_eq!(cache.get(1).unwrap().price, Decimal::from(11));
    }

    #[test]
    fn idempotent_put_marks_dirty_once() {
        let (cache, rx) = harness(Duration::from_secs(1_800));
        let base = now_ns();
        let t = tick(7, Decimal::from(5), 2, base);

        assert!(cache.put(t.clone()));
        assert!(!cache.put(t.clone()));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(7).unwrap().price, Decimal::from(5));
        // One change notification, one dirty entry
        assert_eq!(rx.len(), 1);
        assert_eq!(cache.dirty.len(), 1);
    }

    #[test]
    fn read_surfaces_staleness_without_eviction() {
        let (cache, _rx) = harness(Duration::from_secs(60));
        let old = now_ns() - Duration::from_secs(61).as_nanos() as u64;

        cache.put(tick(1, Decimal::from(10), 1, old));
        let read = cache.get(1).unwrap();
        assert!(read.stale);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.scan_stale(), 1);
        assert_eq!(cache.metrics.system().stale_price_entries.get(), 1);
    }

    #[test]
    fn bulk_get_skips_missing() {
        let (cache, _rx) = harness(Duration::from_secs(1_800));
        let base = now_ns();
        cache.put(tick(1, Decimal::from(1), 1, base));
        cache.put(tick(3, Decimal::from(3), 1, base));

        let got = cache.bulk_get(&[1, 2, 3]);
        assert_eq!(got.len(), 2);
        assert!(got.contains_key(&1) && got.contains_key(&3));
    }

    proptest! {
        /// Final cache state equals the tick with the maximum
        /// (timestamp, -priority) pair seen, for any arrival order.
        #[test]
        fn last_writer_law(offsets in proptest::collection::vec((0u64..100, 1u8..10), 1..40)) {
            let (cache, _rx) = harness(Duration::from_secs(1_800));
            let base = now_ns();

            for (offset, priority) in &offsets {
                // Price derived from the key so equal keys mean equal ticks
                let price = Decimal::from(offset * 100 + *priority as u64);
                cache.put(tick(1, price, *priority, base + offset));
            }

            let expected = offsets
                .iter()
                .map(|(offset, priority)| (*offset, *priority))
                .max_by_key(|(offset, priority)| (*offset, std::cmp::Reverse(*priority)))
                .unwrap();
            let winner = cache.get(1).unwrap();
            prop_assert_eq!(winner.timestamp_ns, base + expected.0);
            prop_assert_eq!(winner.source_priority, expected.1);
        }
    }
}
