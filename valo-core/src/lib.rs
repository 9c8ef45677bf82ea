//! Valo Core - Real-Time Valuation Engine
//!
//! Valo recomputes per-(account, product) market values as price and FX ticks
//! arrive, conflates the resulting burst of valuations per account, and emits
//! batched updates to downstream subscribers.
//!
//! ## Architecture
//! - **Hot caches** for prices, FX rates, and positions, with reverse indexes
//!   for O(1) fan-out lookup
//! - **Lock-free** single-key upserts; no lock held across a suspension point
//! - **Sharded ownership**: only accounts owned by this node are revalued
//! - **Windowed conflation**: latest valuation per (account, product) wins
//!   inside a flush window
//!
//! ## Core Modules
//! - `core`: domain types (ticks, rates, valuations) and fixed-point helpers
//! - `cache`: price / FX / position hot caches and the reverse index
//! - `intake`: broker consumption, record decoding, DLQ routing
//! - `engine`: valuation fan-out, conflation, persistence, composition root
//! - `monitoring`: prometheus metrics, health state, HTTP export
//! - `resilience`: retry backoff and the global panic hook

pub mod cache;
pub mod config;
pub mod core;
pub mod engine;
pub mod intake;
pub mod monitoring;
pub mod resilience;

// Re-export the types nearly every consumer touches
pub use crate::core::{
    AccountId, AssetClass, Currency, CurrencyPair, FxRate, PositionDelta, PriceTick, ProductId,
    Valuation,
};
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats, PricingStrategy, StrategyRegistry};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{
        fixed_point, AccountId, AssetClass, Currency, CurrencyPair, FxRate, PositionDelta,
        PriceTick, ProductId, Valuation,
    };

    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, EngineStats, PricingStrategy, StrategyRegistry};
    pub use crate::intake::{BrokerConsumer, DeadLetterSink, Record, RecordBatch, Topic};

    pub use crate::{Error, Result};
}
