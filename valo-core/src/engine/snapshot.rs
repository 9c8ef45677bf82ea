//! Startup warm-up seam.
//!
//! Caches are process-lifetime and start empty; a snapshot source fills
//! positions and prices once before intake begins.

use crate::core::{AccountId, EngineError, PriceTick, ProductId};
use rust_decimal::Decimal;

pub trait SnapshotSource: Send + Sync {
    /// Per-account holdings to seed the position cache.
    fn positions(&self) -> Result<Vec<(AccountId, Vec<(ProductId, Decimal)>)>, EngineError>;

    /// Ticks to seed the price cache.
    fn prices(&self) -> Result<Vec<PriceTick>, EngineError>;
}

/// No warm-up; the engine starts cold.
pub struct NullSnapshot;

impl SnapshotSource for NullSnapshot {
    fn positions(&self) -> Result<Vec<(AccountId, Vec<(ProductId, Decimal)>)>, EngineError> {
        Ok(Vec::new())
    }

    fn prices(&self) -> Result<Vec<PriceTick>, EngineError> {
        Ok(Vec::new())
    }
}

/// Fixed snapshot contents; used by tests and the replay binary.
#[derive(Default)]
pub struct StaticSnapshot {
    pub positions: Vec<(AccountId, Vec<(ProductId, Decimal)>)>,
    pub prices: Vec<PriceTick>,
}

impl SnapshotSource for StaticSnapshot {
    fn positions(&self) -> Result<Vec<(AccountId, Vec<(ProductId, Decimal)>)>, EngineError> {
        Ok(self.positions.clone())
    }

    fn prices(&self) -> Result<Vec<PriceTick>, EngineError> {
        Ok(self.prices.clone())
    }
}
