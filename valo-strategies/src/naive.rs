//! Naive Decimal strategy: `quantity x price x fx`.
//!
//! Supports every asset class; registered last or used implicitly as the
//! registry fallback. This is the reference the fast path must stay within
//! one ulp of.

use rust_decimal::Decimal;
use valo_core::core::{AssetClass, EngineError, PriceTick};
use valo_core::engine::{naive_market_value, PricingStrategy};

pub struct NaiveDecimal;

impl PricingStrategy for NaiveDecimal {
    fn name(&self) -> &'static str {
        "naive-decimal"
    }

    fn supports(&self, _asset_class: AssetClass) -> bool {
        true
    }

    fn market_value(
        &self,
        quantity: Decimal,
        tick: &PriceTick,
        fx_rate: Decimal,
    ) -> Result<Decimal, EngineError> {
        naive_market_value(quantity, tick.price, fx_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::tick;
    use rust_decimal_macros::dec;

    #[test]
    fn multiplies_through() {
        let strategy = NaiveDecimal;
        let t = tick(1, dec!(2.50), "USD", AssetClass::Bond);
        let mv = strategy.market_value(dec!(100), &t, dec!(1.2)).unwrap();
        assert_eq!(mv, dec!(300.00));
    }

    #[test]
    fn short_positions_are_negative() {
        let strategy = NaiveDecimal;
        let t = tick(1, dec!(4), "USD", AssetClass::Equity);
        let mv = strategy.market_value(dec!(-25), &t, Decimal::ONE).unwrap();
        assert_eq!(mv, dec!(-100));
    }

    #[test]
    fn supports_everything() {
        let strategy = NaiveDecimal;
        for class in [
            AssetClass::Equity,
            AssetClass::Fx,
            AssetClass::Cash,
            AssetClass::FxForward,
            AssetClass::EquitySwap,
            AssetClass::Bond,
        ] {
            assert!(strategy.supports(class));
        }
    }
}
