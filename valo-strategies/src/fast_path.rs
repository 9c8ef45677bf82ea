//! Fixed-point fast path for EQUITY and FX.
//!
//! Values are i64 scaled by 10^6; the three-way product runs in i128 with a
//! single terminal round-half-up, so the result stays within 1 ulp of the
//! Decimal reference for inputs within +/-10^12. Inputs outside the
//! fixed-point range fall back to the Decimal path rather than erroring.

use rust_decimal::Decimal;
use valo_core::core::{fixed_point, AssetClass, EngineError, PriceTick};
use valo_core::engine::{naive_market_value, PricingStrategy};

pub struct EquityFxFastPath;

impl PricingStrategy for EquityFxFastPath {
    fn name(&self) -> &'static str {
        "equity-fx-fast-path"
    }

    fn supports(&self, asset_class: AssetClass) -> bool {
        matches!(asset_class, AssetClass::Equity | AssetClass::Fx)
    }

    fn market_value(
        &self,
        quantity: Decimal,
        tick: &PriceTick,
        fx_rate: Decimal,
    ) -> Result<Decimal, EngineError> {
        let fixed = fixed_point::to_fixed(quantity)
            .and_then(|q| Ok((q, fixed_point::to_fixed(tick.price)?)))
            .and_then(|(q, p)| Ok((q, p, fixed_point::to_fixed(fx_rate)?)));

        match fixed {
            Ok((q, p, f)) => match fixed_point::mul3(q, p, f) {
                Some(mv) => Ok(fixed_point::from_fixed(mv)),
                // Intermediate overflow: wide inputs take the Decimal path
                None => naive_market_value(quantity, tick.price, fx_rate),
            },
            Err(_) => naive_market_value(quantity, tick.price, fx_rate),
        }
    }
}
