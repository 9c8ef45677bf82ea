//! Valo Strategies - per-asset-class market-value computation.
//!
//! Strategies implement the `PricingStrategy` seam from `valo-core` and are
//! resolved first-match by the registry. The fast path for EQUITY and FX
//! works in i64 fixed-point (scale 10^6) to keep Decimal arithmetic off the
//! hot loop; everything else goes through the naive Decimal path.

pub mod bond;
pub mod cash;
pub mod fast_path;
pub mod naive;

#[cfg(test)]
pub mod test_helpers;

pub use bond::BondStrategy;
pub use cash::CashStrategy;
pub use fast_path::EquityFxFastPath;
pub use naive::NaiveDecimal;

use valo_core::engine::StrategyRegistry;

/// Registry with the production strategy set.
///
/// Order matters: first `supports` match wins. FX_FORWARD and EQUITY_SWAP
/// deliberately have no dedicated strategy and fall through to the naive
/// fallback built into the registry.
pub fn default_registry() -> StrategyRegistry {
    StrategyRegistry::new()
        .register(Box::new(EquityFxFastPath))
        .register(Box::new(CashStrategy))
        .register(Box::new(BondStrategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use valo_core::core::AssetClass;

    #[test]
    fn registry_dispatch() {
        let registry = default_registry();
        assert_eq!(
            registry.resolve(AssetClass::Equity).unwrap().name(),
            "equity-fx-fast-path"
        );
        assert_eq!(
            registry.resolve(AssetClass::Fx).unwrap().name(),
            "equity-fx-fast-path"
        );
        assert_eq!(registry.resolve(AssetClass::Cash).unwrap().name(), "cash");
        assert_eq!(registry.resolve(AssetClass::Bond).unwrap().name(), "bond");
        assert!(registry.resolve(AssetClass::FxForward).is_none());
        assert!(registry.resolve(AssetClass::EquitySwap).is_none());
    }
}
