//! Engine health state.
//!
//! Health is derived from the same gauges the metrics endpoint exports:
//! - DEGRADED: mailbox depth above high-water for more than the sustain
//!   window (30 s)
//! - UNHEALTHY: consumer lag above the alert threshold
//!
//! The hot path never sees this; health surfaces only through the HTTP
//! endpoint and logs.

use super::ValoMetrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Overall health of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
        }
    }
}

/// Evaluates health from live gauge values.
pub struct HealthMonitor {
    metrics: Arc<ValoMetrics>,
    mailbox_high_water: i64,
    consumer_lag_alert: i64,
    sustain_window: Duration,
    mailbox_breach_since: Mutex<Option<Instant>>,
}

impl HealthMonitor {
    /// Default sustain window before a mailbox breach degrades the engine.
    pub const DEFAULT_SUSTAIN_WINDOW: Duration = Duration::from_secs(30);

    pub fn new(metrics: Arc<ValoMetrics>, mailbox_high_water: i64, consumer_lag_alert: i64) -> Self {
        Self {
            metrics,
            mailbox_high_water,
            consumer_lag_alert,
            sustain_window: Self::DEFAULT_SUSTAIN_WINDOW,
            mailbox_breach_since: Mutex::new(None),
        }
    }

    /// Override the sustain window (tests).
    pub fn with_sustain_window(mut self, window: Duration) -> Self {
        self.sustain_window = window;
        self
    }

    /// Evaluate current health. Cheap enough to call per scrape.
    pub fn evaluate(&self) -> HealthStatus {
        let lag = self.metrics.intake().consumer_lag_max.get();
        if lag > self.consumer_lag_alert {
            warn!(lag, threshold = self.consumer_lag_alert, "consumer lag over alert threshold");
            return HealthStatus::Unhealthy;
        }

        let depth = self.metrics.broadcast().mailbox_depth.get();
        let mut breach = self.mailbox_breach_since.lock();
        if depth > self.mailbox_high_water {
            let since = breach.get_or_insert_with(Instant::now);
            if since.elapsed() >= self.sustain_window {
                return HealthStatus::Degraded;
            }
        } else {
            *breach = None;
        }

        HealthStatus::Ok
    }
}
