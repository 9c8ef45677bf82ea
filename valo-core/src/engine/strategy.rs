//! Pricing strategy seam.
//!
//! Strategies are pure: no I/O, no state mutation. The registry resolves the
//! first strategy whose `supports` returns true for the tick's asset class
//! and falls back to the naive `quantity x price x fx` Decimal path when
//! nothing matches.

use crate::core::{AssetClass, EngineError, PriceTick};
use rust_decimal::Decimal;

pub trait PricingStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Whether this strategy prices the given asset class.
    fn supports(&self, asset_class: AssetClass) -> bool;

    /// Market value of `quantity` units at `tick`, converted by `fx_rate`.
    ///
    /// Must be pure. Overflow surfaces as a `Processing` error, which the
    /// valuation core isolates to the single holder.
    fn market_value(
        &self,
        quantity: Decimal,
        tick: &PriceTick,
        fx_rate: Decimal,
    ) -> Result<Decimal, EngineError>;
}

/// Ordered strategy lookup with the naive fallback built in.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn PricingStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn register(mut self, strategy: Box<dyn PricingStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// First registered strategy supporting `asset_class`, if any.
    pub fn resolve(&self, asset_class: AssetClass) -> Option<&dyn PricingStrategy> {
        self.strategies
            .iter()
            .find(|s| s.supports(asset_class))
            .map(|s| s.as_ref())
    }

    /// Compute a market value, using the resolved strategy or the naive
    /// fallback.
    pub fn market_value(
        &self,
        quantity: Decimal,
        tick: &PriceTick,
        fx_rate: Decimal,
    ) -> Result<Decimal, EngineError> {
        match self.resolve(tick.asset_class) {
            Some(strategy) => strategy.market_value(quantity, tick, fx_rate),
            None => naive_market_value(quantity, tick.price, fx_rate),
        }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The naive Decimal path: `quantity x price x fx`.
pub fn naive_market_value(
    quantity: Decimal,
    price: Decimal,
    fx_rate: Decimal,
) -> Result<Decimal, EngineError> {
    quantity
        .checked_mul(price)
        .and_then(|local| local.checked_mul(fx_rate))
        .ok_or_else(|| {
            EngineError::Processing(format!(
                "market value overflow: {quantity} x {price} x {fx_rate}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{now_ns, Currency};
    use rust_decimal_macros::dec;

    struct EquityOnly;

    impl PricingStrategy for EquityOnly {
        fn name(&self) -> &'static str {
            "equity-only"
        }

        fn supports(&self, asset_class: AssetClass) -> bool {
            asset_class == AssetClass::Equity
        }

        fn market_value(
            &self,
            _quantity: Decimal,
            _tick: &PriceTick,
            _fx_rate: Decimal,
        ) -> Result<Decimal, EngineError> {
            Ok(dec!(42))
        }
    }

    fn tick(asset_class: AssetClass) -> PriceTick {
        PriceTick {
            product_id: 1,
            price: dec!(2),
            currency: Currency::USD,
            asset_class,
            source: "TEST".into(),
            source_priority: 1,
            timestamp_ns: now_ns(),
            stale: false,
        }
    }

    #[test]
    fn resolves_first_supporting_strategy() {
        let registry = StrategyRegistry::new().register(Box::new(EquityOnly));
        assert!(registry.resolve(AssetClass::Equity).is_some());
        assert!(registry.resolve(AssetClass::Bond).is_none());
    }

    #[test]
    fn falls_back_to_naive() {
        let registry = StrategyRegistry::new().register(Box::new(EquityOnly));

        let equity = registry
            .market_value(dec!(10), &tick(AssetClass::Equity), Decimal::ONE)
            .unwrap();
        assert_eq!(equity, dec!(42));

        let bond = registry
            .market_value(dec!(10), &tick(AssetClass::Bond), dec!(1.5))
            .unwrap();
        assert_eq!(bond, dec!(30));
    }

    #[test]
    fn naive_overflow_is_processing_error() {
        let result = naive_market_value(Decimal::MAX, Decimal::MAX, Decimal::ONE);
        assert!(matches!(result, Err(EngineError::Processing(_))));
    }
}
