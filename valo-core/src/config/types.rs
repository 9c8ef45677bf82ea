use crate::core::{Currency, EngineError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pivot currency for triangulated FX conversion and valuation output.
    #[serde(default = "default_base_currency")]
    pub base_currency: Currency,

    /// Age after which a cached price is surfaced as stale (never evicted).
    #[serde(default = "default_staleness_minutes")]
    pub staleness_threshold_minutes: u64,

    /// Period of the scanner that promotes entries from non-stale to stale.
    #[serde(default = "default_stale_scan_period")]
    pub stale_scan_period_ms: u64,

    /// Conflation flush window.
    #[serde(default = "default_conflation_period")]
    pub conflation_period_ms: u64,

    /// Cold-store flush cadence.
    #[serde(default = "default_persistence_period")]
    pub persistence_period_ms: u64,

    #[serde(default)]
    pub shard: ShardConfig,

    /// Valuation worker threads. Defaults to the number of CPUs.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Drain budget for graceful shutdown before pools are terminated.
    #[serde(default = "default_grace_shutdown")]
    pub grace_shutdown_ms: u64,

    /// Consumer lag above which the engine reports UNHEALTHY.
    #[serde(default = "default_consumer_lag_alert")]
    pub consumer_lag_alert: u64,

    /// Retries for transient processing errors before a record is DLQ'd.
    #[serde(default = "default_dlq_max_retries")]
    pub dlq_max_retries: usize,

    /// Work-queue depth above which intake defers acknowledgement.
    #[serde(default = "default_queue_high_water")]
    pub queue_high_water: usize,

    /// Mailbox depth above which (sustained > 30 s) the engine is DEGRADED.
    #[serde(default = "default_mailbox_high_water")]
    pub mailbox_high_water: i64,

    /// Dirty-set size above which a sustained breach raises an alert.
    #[serde(default = "default_dirty_alert_threshold")]
    pub dirty_alert_threshold: usize,

    /// How long the dirty-set breach must persist before alerting.
    #[serde(default = "default_dirty_alert_window")]
    pub dirty_alert_window_ms: u64,

    /// Cold-store append timeout.
    #[serde(default = "default_coldstore_timeout")]
    pub coldstore_append_timeout_ms: u64,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Shard ownership configuration
///
/// Ownership is stable for the lifetime of a run; changing either field
/// requires a restart with fresh caches and snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShardConfig {
    /// This node's shard index, in `[0, total)`.
    #[serde(default)]
    pub index: u64,

    /// Total shard count; 1 disables sharding.
    #[serde(default = "default_shard_total")]
    pub total: u64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            index: 0,
            total: default_shard_total(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker endpoint, host:port.
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,

    /// Per-poll fetch timeout.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Total window for connection retries at startup; exhaustion is exit
    /// code 3.
    #[serde(default = "default_startup_retry_window")]
    pub startup_retry_window_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            fetch_timeout_ms: default_fetch_timeout(),
            startup_retry_window_ms: default_startup_retry_window(),
        }
    }
}

/// Metrics/health HTTP export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_addr")]
    pub addr: String,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
            path: default_metrics_path(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        // serde defaults are the single source of truth
        serde_json::from_str("{}").expect("empty config must deserialize")
    }
}

impl EngineConfig {
    /// Load from an optional JSON file, then apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    EngineError::Fatal(format!("cannot read config {}: {e}", p.display()))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    EngineError::Fatal(format!("cannot parse config {}: {e}", p.display()))
                })?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BOOTSTRAP_SERVERS` / `BASE_CURRENCY` / `SHARD_INDEX` /
    /// `SHARD_TOTAL` overrides.
    pub fn apply_env(&mut self) -> Result<(), EngineError> {
        if let Ok(v) = std::env::var("BOOTSTRAP_SERVERS") {
            self.broker.bootstrap_servers = v;
        }
        if let Ok(v) = std::env::var("BASE_CURRENCY") {
            self.base_currency = v
                .parse()
                .map_err(|e| EngineError::Fatal(format!("BASE_CURRENCY: {e}")))?;
        }
        if let Ok(v) = std::env::var("SHARD_INDEX") {
            self.shard.index = v
                .parse()
                .map_err(|e| EngineError::Fatal(format!("SHARD_INDEX: {e}")))?;
        }
        if let Ok(v) = std::env::var("SHARD_TOTAL") {
            self.shard.total = v
                .parse()
                .map_err(|e| EngineError::Fatal(format!("SHARD_TOTAL: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.shard.total == 0 {
            return Err(EngineError::Fatal("shard.total must be >= 1".into()));
        }
        if self.shard.index >= self.shard.total {
            return Err(EngineError::Fatal(format!(
                "shard.index {} out of range for shard.total {}",
                self.shard.index, self.shard.total
            )));
        }
        if self.worker_pool_size == 0 {
            return Err(EngineError::Fatal("worker.pool.size must be >= 1".into()));
        }
        if self.conflation_period_ms == 0 || self.persistence_period_ms == 0 {
            return Err(EngineError::Fatal(
                "conflation and persistence periods must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_minutes * 60)
    }

    pub fn conflation_period(&self) -> Duration {
        Duration::from_millis(self.conflation_period_ms)
    }

    pub fn persistence_period(&self) -> Duration {
        Duration::from_millis(self.persistence_period_ms)
    }

    pub fn stale_scan_period(&self) -> Duration {
        Duration::from_millis(self.stale_scan_period_ms)
    }

    pub fn grace_shutdown(&self) -> Duration {
        Duration::from_millis(self.grace_shutdown_ms)
    }

    /// Permit budget for the valuation admission gate.
    pub fn admission_permits(&self) -> u64 {
        2 * self.worker_pool_size as u64
    }
}

// Default value functions

fn default_base_currency() -> Currency {
    Currency::USD
}

fn default_staleness_minutes() -> u64 {
    30
}

fn default_stale_scan_period() -> u64 {
    5_000
}

fn default_conflation_period() -> u64 {
    250
}

fn default_persistence_period() -> u64 {
    1_000
}

fn default_shard_total() -> u64 {
    1
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_grace_shutdown() -> u64 {
    25_000
}

fn default_consumer_lag_alert() -> u64 {
    1_000
}

fn default_dlq_max_retries() -> usize {
    3
}

fn default_queue_high_water() -> usize {
    10_000
}

fn default_mailbox_high_water() -> i64 {
    50_000
}

fn default_dirty_alert_threshold() -> usize {
    100_000
}

fn default_dirty_alert_window() -> u64 {
    10_000
}

fn default_coldstore_timeout() -> u64 {
    5_000
}

fn default_bootstrap_servers() -> String {
    "127.0.0.1:9092".to_string()
}

fn default_fetch_timeout() -> u64 {
    5_000
}

fn default_startup_retry_window() -> u64 {
    30_000
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9464".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
