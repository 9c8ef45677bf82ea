//! Engine configuration.
//!
//! Everything is optional with a stated default. Precedence, lowest to
//! highest: built-in defaults, JSON config file, environment variables
//! (`BOOTSTRAP_SERVERS`, `BASE_CURRENCY`, `SHARD_INDEX`, `SHARD_TOTAL`).
//! Validation failures are fatal configuration errors (exit code 1).

mod types;

pub use types::{BrokerConfig, EngineConfig, MetricsConfig, ShardConfig};
