//! Shared builders for strategy tests.

use rust_decimal::Decimal;
use valo_core::core::{now_ns, AssetClass, PriceTick, ProductId};

/// A well-formed tick with the given price, currency, and asset class.
pub fn tick(product_id: ProductId, price: Decimal, currency: &str, asset_class: AssetClass) -> PriceTick {
    PriceTick {
        product_id,
        price,
        currency: currency.parse().expect("valid test currency"),
        asset_class,
        source: "TEST".into(),
        source_priority: 1,
        timestamp_ns: now_ns(),
        stale: false,
    }
}
