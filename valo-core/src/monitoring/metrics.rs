//! Prometheus metrics for the valuation engine.
//!
//! Counter and gauge families are grouped by pipeline stage:
//! - intake (broker consumption, decoding, DLQ)
//! - valuation (fan-out, shard filtering, admission)
//! - broadcast (conflation mailbox, emission)
//! - system (cache sizes, persistence, shutdown)

use prometheus::{IntCounter, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::info;

/// Central registry for all engine metrics
#[derive(Clone)]
pub struct ValoMetrics {
    registry: Arc<Registry>,
    intake: Arc<IntakeMetrics>,
    valuation: Arc<ValuationMetrics>,
    broadcast: Arc<BroadcastMetrics>,
    system: Arc<SystemMetrics>,
}

impl ValoMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let intake = Arc::new(IntakeMetrics::new(&registry)?);
        let valuation = Arc::new(ValuationMetrics::new(&registry)?);
        let broadcast = Arc::new(BroadcastMetrics::new(&registry)?);
        let system = Arc::new(SystemMetrics::new(&registry)?);

        info!("metrics registry initialized");

        Ok(Self {
            registry,
            intake,
            valuation,
            broadcast,
            system,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn intake(&self) -> &IntakeMetrics {
        &self.intake
    }

    pub fn valuation(&self) -> &ValuationMetrics {
        &self.valuation
    }

    pub fn broadcast(&self) -> &BroadcastMetrics {
        &self.broadcast
    }

    pub fn system(&self) -> &SystemMetrics {
        &self.system
    }
}

/// Broker intake metrics
pub struct IntakeMetrics {
    /// Tick records received on the price and fx topics.
    pub ticks_received: IntCounter,
    /// Records that failed to decode.
    pub ticks_parse_errors: IntCounter,
    /// Records rejected by semantic validation.
    pub validation_errors: IntCounter,
    /// Records routed to the dead-letter sink, any kind.
    pub dlq_offers: IntCounter,
    /// Consumer lag per group.
    pub consumer_lag: IntGaugeVec,
    /// Worst lag across all groups; input to the health state.
    pub consumer_lag_max: IntGauge,
    /// Polls deferred because the work queue was over the high-water mark.
    pub backpressure_deferrals: IntCounter,
}

impl IntakeMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let ticks_received = IntCounter::with_opts(
            Opts::new("intake_ticks_received_total", "Tick records received").namespace("valo"),
        )?;
        registry.register(Box::new(ticks_received.clone()))?;

        let ticks_parse_errors = IntCounter::with_opts(
            Opts::new("intake_ticks_parse_errors_total", "Records that failed to decode")
                .namespace("valo"),
        )?;
        registry.register(Box::new(ticks_parse_errors.clone()))?;

        let validation_errors = IntCounter::with_opts(
            Opts::new(
                "intake_validation_errors_total",
                "Records rejected by semantic validation",
            )
            .namespace("valo"),
        )?;
        registry.register(Box::new(validation_errors.clone()))?;

        let dlq_offers = IntCounter::with_opts(
            Opts::new("intake_dlq_offers_total", "Records offered to the dead-letter sink")
                .namespace("valo"),
        )?;
        registry.register(Box::new(dlq_offers.clone()))?;

        let consumer_lag = IntGaugeVec::new(
            Opts::new("intake_consumer_lag", "Consumer lag per group").namespace("valo"),
            &["group"],
        )?;
        registry.register(Box::new(consumer_lag.clone()))?;

        let consumer_lag_max = IntGauge::with_opts(
            Opts::new("intake_consumer_lag_max", "Worst consumer lag across groups")
                .namespace("valo"),
        )?;
        registry.register(Box::new(consumer_lag_max.clone()))?;

        let backpressure_deferrals = IntCounter::with_opts(
            Opts::new(
                "intake_backpressure_deferrals_total",
                "Acks deferred because the work queue exceeded its high-water mark",
            )
            .namespace("valo"),
        )?;
        registry.register(Box::new(backpressure_deferrals.clone()))?;

        Ok(Self {
            ticks_received,
            ticks_parse_errors,
            validation_errors,
            dlq_offers,
            consumer_lag,
            consumer_lag_max,
            backpressure_deferrals,
        })
    }
}

/// Valuation fan-out metrics
pub struct ValuationMetrics {
    /// Work items whose product had no cached price.
    pub price_misses: IntCounter,
    /// Holders skipped because the account is owned by another shard.
    pub shard_skipped: IntCounter,
    /// Per-holder computation failures (isolated, never abort the fan-out).
    pub holder_errors: IntCounter,
    /// Work items dropped because the admission gate was exhausted.
    pub ratelimit_rejected: IntCounter,
    /// FX conversions that fell back to 1.0.
    pub fx_fallbacks: IntCounter,
    /// Work items that reached the FAILED terminal state (every holder
    /// errored).
    pub work_items_failed: IntCounter,
    /// Current depth of the valuation work queue.
    pub work_queue_depth: IntGauge,
}

impl ValuationMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let price_misses = IntCounter::with_opts(
            Opts::new("valuation_price_misses_total", "Work items with no cached price")
                .namespace("valo"),
        )?;
        registry.register(Box::new(price_misses.clone()))?;

        let shard_skipped = IntCounter::with_opts(
            Opts::new("valuation_shard_skipped_total", "Holders owned by another shard")
                .namespace("valo"),
        )?;
        registry.register(Box::new(shard_skipped.clone()))?;

        let holder_errors = IntCounter::with_opts(
            Opts::new("valuation_holder_errors_total", "Per-holder computation failures")
                .namespace("valo"),
        )?;
        registry.register(Box::new(holder_errors.clone()))?;

        let ratelimit_rejected = IntCounter::with_opts(
            Opts::new(
                "valuation_ratelimit_rejected_total",
                "Work items dropped by the admission gate",
            )
            .namespace("valo"),
        )?;
        registry.register(Box::new(ratelimit_rejected.clone()))?;

        let fx_fallbacks = IntCounter::with_opts(
            Opts::new("valuation_fx_fallbacks_total", "FX conversions that fell back to 1.0")
                .namespace("valo"),
        )?;
        registry.register(Box::new(fx_fallbacks.clone()))?;

        let work_items_failed = IntCounter::with_opts(
            Opts::new(
                "valuation_work_items_failed_total",
                "Work items that reached the FAILED terminal state",
            )
            .namespace("valo"),
        )?;
        registry.register(Box::new(work_items_failed.clone()))?;

        let work_queue_depth = IntGauge::with_opts(
            Opts::new("valuation_work_queue_depth", "Depth of the valuation work queue")
                .namespace("valo"),
        )?;
        registry.register(Box::new(work_queue_depth.clone()))?;

        Ok(Self {
            price_misses,
            shard_skipped,
            holder_errors,
            ratelimit_rejected,
            fx_fallbacks,
            work_items_failed,
            work_queue_depth,
        })
    }
}

/// Conflation and emission metrics
pub struct BroadcastMetrics {
    /// Valuations submitted to the broadcaster.
    pub valuations_submitted: IntCounter,
    /// Valuations overwritten inside a flush window.
    pub valuations_dropped_by_conflation: IntCounter,
    /// Batches emitted to subscriber topics.
    pub batches_emitted: IntCounter,
    /// Emissions that exhausted their retries.
    pub emit_errors: IntCounter,
    /// Entries currently buffered in the mailbox.
    pub mailbox_depth: IntGauge,
}

impl BroadcastMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let valuations_submitted = IntCounter::with_opts(
            Opts::new("broadcast_valuations_submitted_total", "Valuations submitted")
                .namespace("valo"),
        )?;
        registry.register(Box::new(valuations_submitted.clone()))?;

        let valuations_dropped_by_conflation = IntCounter::with_opts(
            Opts::new(
                "broadcast_valuations_dropped_by_conflation_total",
                "Valuations overwritten inside a flush window",
            )
            .namespace("valo"),
        )?;
        registry.register(Box::new(valuations_dropped_by_conflation.clone()))?;

        let batches_emitted = IntCounter::with_opts(
            Opts::new("broadcast_batches_emitted_total", "Batches emitted to subscribers")
                .namespace("valo"),
        )?;
        registry.register(Box::new(batches_emitted.clone()))?;

        let emit_errors = IntCounter::with_opts(
            Opts::new("broadcast_emit_errors_total", "Emissions that exhausted retries")
                .namespace("valo"),
        )?;
        registry.register(Box::new(emit_errors.clone()))?;

        let mailbox_depth = IntGauge::with_opts(
            Opts::new("broadcast_mailbox_depth", "Entries buffered in the conflation mailbox")
                .namespace("valo"),
        )?;
        registry.register(Box::new(mailbox_depth.clone()))?;

        Ok(Self {
            valuations_submitted,
            valuations_dropped_by_conflation,
            batches_emitted,
            emit_errors,
            mailbox_depth,
        })
    }
}

/// Cache, persistence, and process-level metrics
pub struct SystemMetrics {
    pub price_cache_size: IntGauge,
    pub fx_cache_size: IntGauge,
    pub position_cache_size: IntGauge,
    /// Price entries currently past the staleness threshold.
    pub stale_price_entries: IntGauge,
    /// Products awaiting a cold-store append.
    pub dirty_products: IntGauge,
    /// Cold-store batches appended.
    pub coldstore_appends: IntCounter,
    /// Cold-store appends that failed after retries.
    pub coldstore_errors: IntCounter,
    /// Shutdowns that exceeded the grace period.
    pub forced_shutdowns: IntCounter,
}

impl SystemMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let price_cache_size = IntGauge::with_opts(
            Opts::new("system_price_cache_size", "Entries in the price cache").namespace("valo"),
        )?;
        registry.register(Box::new(price_cache_size.clone()))?;

        let fx_cache_size = IntGauge::with_opts(
            Opts::new("system_fx_cache_size", "Pairs in the fx cache").namespace("valo"),
        )?;
        registry.register(Box::new(fx_cache_size.clone()))?;

        let position_cache_size = IntGauge::with_opts(
            Opts::new("system_position_cache_size", "Entries in the position cache")
                .namespace("valo"),
        )?;
        registry.register(Box::new(position_cache_size.clone()))?;

        let stale_price_entries = IntGauge::with_opts(
            Opts::new("system_stale_price_entries", "Price entries past the staleness threshold")
                .namespace("valo"),
        )?;
        registry.register(Box::new(stale_price_entries.clone()))?;

        let dirty_products = IntGauge::with_opts(
            Opts::new("system_dirty_products", "Products awaiting a cold-store append")
                .namespace("valo"),
        )?;
        registry.register(Box::new(dirty_products.clone()))?;

        let coldstore_appends = IntCounter::with_opts(
            Opts::new("system_coldstore_appends_total", "Cold-store batches appended")
                .namespace("valo"),
        )?;
        registry.register(Box::new(coldstore_appends.clone()))?;

        let coldstore_errors = IntCounter::with_opts(
            Opts::new(
                "system_coldstore_errors_total",
                "Cold-store appends that failed after retries",
            )
            .namespace("valo"),
        )?;
        registry.register(Box::new(coldstore_errors.clone()))?;

        let forced_shutdowns = IntCounter::with_opts(
            Opts::new("system_forced_shutdowns_total", "Shutdowns exceeding the grace period")
                .namespace("valo"),
        )?;
        registry.register(Box::new(forced_shutdowns.clone()))?;

        Ok(Self {
            price_cache_size,
            fx_cache_size,
            position_cache_size,
            stale_price_entries,
            dirty_products,
            coldstore_appends,
            coldstore_errors,
            forced_shutdowns,
        })
    }
}

impl Default for ValoMetrics {
    #[allow(clippy::panic)] // metrics are critical infrastructure
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("FATAL: failed to create metrics registry: {e}");
            panic!("cannot create metrics registry")
        })
    }
}
