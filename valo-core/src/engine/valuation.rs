//! Valuation fan-out.
//!
//! Input is a product whose price or FX input changed. The core looks up the
//! winning tick, resolves a strategy for its asset class, and recomputes the
//! market value for every holder owned by this shard, submitting each result
//! to the conflation broadcaster. A failure for one holder is logged and
//! counted; the remaining holders still compute.

use crate::cache::{FxCache, PositionCache, PriceCache};
use crate::core::{now_ns, ProductId, Valuation, WorkItem};
use crate::engine::conflation::ConflationBroadcaster;
use crate::engine::shard::ShardRouter;
use crate::engine::strategy::StrategyRegistry;
use crate::monitoring::ValoMetrics;
use crossbeam::channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::{trace, warn};

/// Producer half of the valuation work queue.
///
/// Cloned into every cache that notifies on change. Sends never block; the
/// queue is unbounded and intake applies backpressure at the ack boundary.
#[derive(Clone)]
pub struct WorkSender {
    tx: Sender<WorkItem>,
    metrics: Arc<ValoMetrics>,
}

impl WorkSender {
    /// Enqueue a revaluation for `product_id`.
    pub fn enqueue(&self, product_id: ProductId) {
        if self.tx.send(WorkItem::new(product_id)).is_ok() {
            self.metrics
                .valuation()
                .work_queue_depth
                .set(self.tx.len() as i64);
        }
    }

    /// Current queue depth; intake's high-water check reads this.
    pub fn depth(&self) -> usize {
        self.tx.len()
    }
}

/// Build the valuation work queue.
pub fn work_channel(metrics: Arc<ValoMetrics>) -> (WorkSender, Receiver<WorkItem>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    (WorkSender { tx, metrics }, rx)
}

/// Per-product fan-out result.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RevalueOutcome {
    /// Valuations submitted to the broadcaster.
    pub emitted: usize,
    /// Holders owned by another shard.
    pub shard_skipped: usize,
    /// Holders with zero quantity.
    pub zero_skipped: usize,
    /// Holders whose computation failed.
    pub errors: usize,
}

pub struct ValuationCore {
    price_cache: Arc<PriceCache>,
    fx_cache: Arc<FxCache>,
    position_cache: Arc<PositionCache>,
    registry: Arc<StrategyRegistry>,
    router: ShardRouter,
    broadcaster: Arc<ConflationBroadcaster>,
    metrics: Arc<ValoMetrics>,
}

impl ValuationCore {
    pub fn new(
        price_cache: Arc<PriceCache>,
        fx_cache: Arc<FxCache>,
        position_cache: Arc<PositionCache>,
        registry: Arc<StrategyRegistry>,
        router: ShardRouter,
        broadcaster: Arc<ConflationBroadcaster>,
        metrics: Arc<ValoMetrics>,
    ) -> Self {
        Self {
            price_cache,
            fx_cache,
            position_cache,
            registry,
            router,
            broadcaster,
            metrics,
        }
    }

    /// Recompute valuations for every owned holder of `product_id`.
    pub fn revalue(&self, product_id: ProductId) -> RevalueOutcome {
        let mut outcome = RevalueOutcome::default();

        let Some(tick) = self.price_cache.get(product_id) else {
            self.metrics.valuation().price_misses.inc();
            trace!(product_id, "no cached price, skipping");
            return outcome;
        };

        self.fx_cache
            .register_product_currency(product_id, tick.currency);

        let holders = self.position_cache.accounts_holding(product_id);
        if holders.is_empty() {
            return outcome;
        }

        let base = self.fx_cache.base_currency();

        for account_id in holders {
            if !self.router.owns(account_id) {
                outcome.shard_skipped += 1;
                self.metrics.valuation().shard_skipped.inc();
                continue;
            }

            let quantity = self.position_cache.quantity(account_id, product_id);
            if quantity == rust_decimal::Decimal::ZERO {
                outcome.zero_skipped += 1;
                continue;
            }

            let fx_rate = self.fx_cache.convert(tick.currency, base);
            match self.registry.market_value(quantity, &tick, fx_rate) {
                Ok(market_value) => {
                    self.broadcaster.submit(Valuation {
                        account_id,
                        product_id,
                        market_value,
                        price_used: tick.price,
                        fx_rate_used: fx_rate,
                        source: tick.source.clone(),
                        computed_at: now_ns(),
                    });
                    outcome.emitted += 1;
                }
                Err(e) => {
                    outcome.errors += 1;
                    self.metrics.valuation().holder_errors.inc();
                    warn!(account_id, product_id, error = %e, "holder valuation failed");
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardConfig;
    use crate::core::{AssetClass, Currency, FxRate, PriceTick};
    use crate::engine::conflation::CollectingSink;
    use crate::engine::persistence::DirtySet;
    use crate::intake::CollectingDlq;
    use crate::resilience::BackoffConfig;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        core: ValuationCore,
        sink: Arc<CollectingSink>,
        broadcaster: Arc<ConflationBroadcaster>,
        positions: Arc<PositionCache>,
        prices: Arc<PriceCache>,
        fx: Arc<FxCache>,
        metrics: Arc<ValoMetrics>,
    }

    fn harness(router: ShardRouter) -> Harness {
        let metrics = Arc::new(ValoMetrics::new().unwrap());
        let (work, _rx) = work_channel(metrics.clone());
        let dirty = Arc::new(DirtySet::new(metrics.clone()));
        let prices = Arc::new(PriceCache::new(
            Duration::from_secs(1_800),
            work.clone(),
            dirty,
            metrics.clone(),
        ));
        let fx = Arc::new(FxCache::new(Currency::USD, work, metrics.clone()));
        let positions = Arc::new(PositionCache::new(metrics.clone()));
        let sink = Arc::new(CollectingSink::new());
        let broadcaster = Arc::new(ConflationBroadcaster::new(
            sink.clone(),
            Arc::new(CollectingDlq::new()),
            metrics.clone(),
            BackoffConfig::with_max_retries(0),
        ));
        let core = ValuationCore::new(
            prices.clone(),
            fx.clone(),
            positions.clone(),
            Arc::new(StrategyRegistry::new()),
            router,
            broadcaster.clone(),
            metrics.clone(),
        );
        Harness {
            core,
            sink,
            broadcaster,
            positions,
            prices,
            fx,
            metrics,
        }
    }

    fn tick(product_id: ProductId, price: Decimal, currency: &str) -> PriceTick {
        PriceTick {
            product_id,
            price,
            currency: currency.parse().unwrap(),
            asset_class: AssetClass::Equity,
            source: "TEST".into(),
            source_priority: 2,
            timestamp_ns: now_ns(),
            stale: false,
        }
    }

    #[test]
    fn single_holder_single_tick() {
        let h = harness(ShardRouter::unsharded());
        h.positions.set_quantity(7, 42, dec!(100));
        h.prices.put(tick(42, dec!(1.25), "USD"));

        let outcome = h.core.revalue(42);
        assert_eq!(outcome.emitted, 1);

        h.broadcaster.flush();
        let emitted = h.sink.all_valuations();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].account_id, 7);
        assert_eq!(emitted[0].product_id, 42);
        assert_eq!(emitted[0].market_value, dec!(125.00));
        assert_eq!(emitted[0].price_used, dec!(1.25));
        assert_eq!(emitted[0].fx_rate_used, Decimal::ONE);
    }

    #[test]
    fn fx_conversion_applies() {
        let h = harness(ShardRouter::unsharded());
        h.positions.set_quantity(3, 91, dec!(1000));
        h.fx.put(FxRate {
            pair: "EURUSD".parse().unwrap(),
            rate: dec!(1.20),
            timestamp_ns: now_ns(),
        });
        h.prices.put(tick(91, dec!(2.00), "EUR"));

        h.core.revalue(91);
        h.broadcaster.flush();

        let emitted = h.sink.all_valuations();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].market_value, dec!(2400.00));
        assert_eq!(emitted[0].fx_rate_used, dec!(1.20));
    }

    #[test]
    fn unowned_holder_is_skipped_and_counted() {
        let h = harness(ShardRouter::new(ShardConfig { index: 1, total: 4 }));
        h.positions.set_quantity(2, 77, dec!(10));
        h.prices.put(tick(77, dec!(5), "USD"));

        let outcome = h.core.revalue(77);
        assert_eq!(outcome.emitted, 0);
        assert_eq!(outcome.shard_skipped, 1);
        assert_eq!(h.metrics.valuation().shard_skipped.get(), 1);

        h.broadcaster.flush();
        assert!(h.sink.all_valuations().is_empty());
    }

    #[test]
    fn missing_price_counts_a_miss() {
        let h = harness(ShardRouter::unsharded());
        h.positions.set_quantity(1, 5, dec!(10));

        let outcome = h.core.revalue(5);
        assert_eq!(outcome, RevalueOutcome::default());
        assert_eq!(h.metrics.valuation().price_misses.get(), 1);
    }

    #[test]
    fn no_holders_is_a_quiet_return() {
        let h = harness(ShardRouter::unsharded());
        h.prices.put(tick(5, dec!(1), "USD"));
        assert_eq!(h.core.revalue(5), RevalueOutcome::default());
    }

    #[test]
    fn holder_error_does_not_abort_others() {
        let h = harness(ShardRouter::unsharded());
        // Decimal::MAX * Decimal::MAX overflows the naive path
        h.positions.set_quantity(1, 9, Decimal::MAX);
        h.positions.set_quantity(2, 9, dec!(10));
        h.prices.put(tick(9, Decimal::MAX, "USD"));

        let outcome = h.core.revalue(9);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.emitted, 1);
        assert_eq!(h.metrics.valuation().holder_errors.get(), 1);
    }

    #[test]
    fn all_owned_holders_are_valued() {
        let h = harness(ShardRouter::new(ShardConfig { index: 0, total: 2 }));
        for account_id in 0..10u64 {
            h.positions.set_quantity(account_id, 42, dec!(1));
        }
        h.prices.put(tick(42, dec!(3), "USD"));

        let outcome = h.core.revalue(42);
        // Even accounts only
        assert_eq!(outcome.emitted, 5);
        assert_eq!(outcome.shard_skipped, 5);

        h.broadcaster.flush();
        for v in h.sink.all_valuations() {
            assert_eq!(v.account_id % 2, 0);
        }
    }
}
