//! Bonds: percent-of-par quotation, so market value divides the quoted price
//! by 100.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use valo_core::core::{AssetClass, EngineError, PriceTick};
use valo_core::engine::PricingStrategy;

pub struct BondStrategy;

impl PricingStrategy for BondStrategy {
    fn name(&self) -> &'static str {
        "bond"
    }

    fn supports(&self, asset_class: AssetClass) -> bool {
        asset_class == AssetClass::Bond
    }

    fn market_value(
        &self,
        quantity: Decimal,
        tick: &PriceTick,
        fx_rate: Decimal,
    ) -> Result<Decimal, EngineError> {
        let clean = tick.price / dec!(100);
        quantity
            .checked_mul(clean)
            .and_then(|local| local.checked_mul(fx_rate))
            .ok_or_else(|| {
                EngineError::Processing(format!(
                    "bond value overflow: {quantity} x {clean} x {fx_rate}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::tick;

    #[test]
    fn par_quote_divides_by_hundred() {
        // 1m face at 98.50 quoted = 985,000
        let t = tick(1, dec!(98.50), "USD", AssetClass::Bond);
        let mv = BondStrategy
            .market_value(dec!(1000000), &t, Decimal::ONE)
            .unwrap();
        assert_eq!(mv, dec!(985000.0000));
    }

    #[test]
    fn fx_applies_after_par() {
        let t = tick(1, dec!(100), "EUR", AssetClass::Bond);
        let mv = BondStrategy
            .market_value(dec!(1000), &t, dec!(1.2))
            .unwrap();
        assert_eq!(mv, dec!(1200.0));
    }
}
