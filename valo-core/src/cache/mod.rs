//! Hot in-memory caches.
//!
//! The caches are the only shared mutable state in the engine. All reads are
//! lock-free; writes are single-key atomic upserts through the dashmap entry
//! API. Reverse-index mutations follow the primary write, so a concurrent
//! reader may briefly observe "present in primary, missing from index" -
//! callers treat an index miss as no work.

pub mod fx;
pub mod position;
pub mod price;
pub mod reverse_index;

pub use fx::FxCache;
pub use position::PositionCache;
pub use price::PriceCache;
pub use reverse_index::ReverseIndex;
