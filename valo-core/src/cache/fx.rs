//! FX hot cache: pair -> latest rate, plus the currency -> products reverse
//! index that drives the ripple.
//!
//! Only the arriving direction of a pair is stored; the inverse is derived by
//! reciprocal and cross rates are triangulated through the configured base
//! currency. Conversion never fails: the last resort is 1.0 with a WARN and a
//! counter increment.

use crate::cache::ReverseIndex;
use crate::core::{Currency, CurrencyPair, FxRate, ProductId};
use crate::engine::valuation::WorkSender;
use crate::monitoring::ValoMetrics;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{trace, warn};

pub struct FxCache {
    rates: DashMap<CurrencyPair, FxRate>,
    currency_products: ReverseIndex<Currency, ProductId>,
    base_currency: Currency,
    work: WorkSender,
    metrics: Arc<ValoMetrics>,
}

impl FxCache {
    pub fn new(base_currency: Currency, work: WorkSender, metrics: Arc<ValoMetrics>) -> Self {
        Self {
            rates: DashMap::new(),
            currency_products: ReverseIndex::new(),
            base_currency,
            work,
            metrics,
        }
    }

    pub fn base_currency(&self) -> Currency {
        self.base_currency
    }

    /// Store `rate` and ripple: every product whose issue currency is either
    /// side of the pair is enqueued for revaluation.
    ///
    /// Returns the number of products rippled.
    pub fn put(&self, rate: FxRate) -> usize {
        let pair = rate.pair;
        self.rates.insert(pair, rate);
        self.metrics
            .system()
            .fx_cache_size
            .set(self.rates.len() as i64);

        let mut affected = self.currency_products.get(&pair.base);
        affected.extend(self.currency_products.get(&pair.quote));

        let rippled = affected.len();
        for product_id in affected {
            self.work.enqueue(product_id);
        }
        trace!(pair = %pair, rippled, "fx rate stored");
        rippled
    }

    /// Record that `product_id` is issued in `currency`. Idempotent; called
    /// on every price-tick intake.
    pub fn register_product_currency(&self, product_id: ProductId, currency: Currency) {
        self.currency_products.insert(currency, product_id);
    }

    /// Convert one unit of `from` into `to`.
    ///
    /// Resolution order: identity, direct pair, reciprocal of the inverse
    /// pair, triangulation through the base currency, then 1.0 as a counted
    /// fallback.
    pub fn convert(&self, from: Currency, to: Currency) -> Decimal {
        if from == to {
            return Decimal::ONE;
        }

        if let Some(rate) = self.direct(from, to) {
            return rate;
        }

        if let Some(via_base) = self.triangulate(from, to) {
            return via_base;
        }

        warn!(from = %from, to = %to, "no fx path, falling back to 1.0");
        self.metrics.valuation().fx_fallbacks.inc();
        Decimal::ONE
    }

    /// Direct pair, or reciprocal of the stored inverse.
    fn direct(&self, from: Currency, to: Currency) -> Option<Decimal> {
        let pair = CurrencyPair::new(from, to);
        if let Some(entry) = self.rates.get(&pair) {
            return Some(entry.value().rate);
        }
        if let Some(entry) = self.rates.get(&pair.inverted()) {
            let rate = entry.value().rate;
            if rate > Decimal::ZERO {
                return Decimal::ONE.checked_div(rate);
            }
        }
        None
    }

    /// `from->base` divided by `to->base`, each leg direct or reciprocal.
    fn triangulate(&self, from: Currency, to: Currency) -> Option<Decimal> {
        let from_leg = if from == self.base_currency {
            Decimal::ONE
        } else {
            self.direct(from, self.base_currency)?
        };
        let to_leg = if to == self.base_currency {
            Decimal::ONE
        } else {
            self.direct(to, self.base_currency)?
        };
        if to_leg == Decimal::ZERO {
            return None;
        }
        from_leg.checked_div(to_leg)
    }

    /// Products registered under `currency` (test and warm-up support).
    pub fn products_for(&self, currency: Currency) -> std::collections::HashSet<ProductId> {
        self.currency_products.get(&currency)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
