//! Cash balances: one unit of a cash product is one unit of its currency.
//!
//! The tick's price is treated as unity; only the FX conversion matters.

use rust_decimal::Decimal;
use valo_core::core::{AssetClass, EngineError, PriceTick};
use valo_core::engine::PricingStrategy;

pub struct CashStrategy;

impl PricingStrategy for CashStrategy {
    fn name(&self) -> &'static str {
        "cash"
    }

    fn supports(&self, asset_class: AssetClass) -> bool {
        asset_class == AssetClass::Cash
    }

    fn market_value(
        &self,
        quantity: Decimal,
        _tick: &PriceTick,
        fx_rate: Decimal,
    ) -> Result<Decimal, EngineError> {
        quantity.checked_mul(fx_rate).ok_or_else(|| {
            EngineError::Processing(format!("cash value overflow: {quantity} x {fx_rate}"))
        })
    }
}
