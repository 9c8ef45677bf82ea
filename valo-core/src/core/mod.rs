//! Domain types shared across the engine.

pub mod errors;
pub mod types;
pub mod work_fsm;

pub use errors::{EngineError, ErrorKind, FixedPointError};
pub use types::{
    fixed_point, now_ns, AccountId, AssetClass, Currency, CurrencyPair, EodPosition, EodSnapshot,
    FxRate, PositionDelta, PriceTick, ProductId, TimestampNs, Valuation,
};
pub use work_fsm::{WorkItem, WorkState};
