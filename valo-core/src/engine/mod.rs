//! Engine composition root.
//!
//! The `Engine` constructs every component explicitly - caches, work queue,
//! worker pool, tickers, sinks - and owns shutdown. No globals: thread-safety
//! is a property of each component's operations, not of process state.
//!
//! Thread layout: one intake loop per topic feeds the shared caches; a
//! bounded worker pool drains the valuation work queue; one ticker drives the
//! conflation flush, a second drives the persistence flush, a third promotes
//! stale price entries.

pub mod admission;
pub mod conflation;
pub mod persistence;
pub mod shard;
pub mod snapshot;
pub mod strategy;
pub mod valuation;

pub use admission::AdmissionGate;
pub use conflation::{account_topic, CollectingSink, ConflationBroadcaster, SubscriberSink, TracingSink};
pub use persistence::{ColdStore, DirtySet, InMemoryColdStore, JsonlColdStore, PersistenceFlusher};
pub use shard::ShardRouter;
pub use snapshot::{NullSnapshot, SnapshotSource, StaticSnapshot};
pub use strategy::{naive_market_value, PricingStrategy, StrategyRegistry};
pub use valuation::{work_channel, RevalueOutcome, ValuationCore, WorkSender};

use crate::cache::{FxCache, PositionCache, PriceCache};
use crate::config::EngineConfig;
use crate::core::{EngineError, WorkItem, WorkState};
use crate::intake::{BrokerConsumer, DeadLetterSink, TickIntake};
use crate::monitoring::{HealthMonitor, ValoMetrics};
use crate::resilience::BackoffConfig;
use crossbeam::channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counter snapshot printed at end of run.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub ticks_received: u64,
    pub parse_errors: u64,
    pub valuations_submitted: u64,
    pub dropped_by_conflation: u64,
    pub batches_emitted: u64,
    pub dlq_offers: u64,
    pub shard_skipped: u64,
    pub ratelimit_rejected: u64,
    pub coldstore_appends: u64,
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    Forced,
}

pub struct Engine {
    config: EngineConfig,
    metrics: Arc<ValoMetrics>,
    shutdown: Arc<AtomicBool>,
    active_threads: Arc<AtomicUsize>,

    price_cache: Arc<PriceCache>,
    fx_cache: Arc<FxCache>,
    position_cache: Arc<PositionCache>,
    dirty: Arc<DirtySet>,
    broadcaster: Arc<ConflationBroadcaster>,
    valuation: Arc<ValuationCore>,
    flusher: Arc<PersistenceFlusher>,
    gate: Arc<AdmissionGate>,
    work: WorkSender,
    work_rx: Receiver<crate::core::WorkItem>,
    dlq: Arc<dyn DeadLetterSink>,
    health: Arc<HealthMonitor>,

    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<StrategyRegistry>,
        sink: Arc<dyn SubscriberSink>,
        cold_store: Arc<dyn ColdStore>,
        dlq: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = Arc::new(
            ValoMetrics::new().map_err(|e| EngineError::Fatal(format!("metrics init: {e}")))?,
        );
        let shutdown = Arc::new(AtomicBool::new(false));

        let (work, work_rx) = work_channel(metrics.clone());
        let dirty = Arc::new(DirtySet::new(metrics.clone()));
        let price_cache = Arc::new(PriceCache::new(
            config.staleness_threshold(),
            work.clone(),
            dirty.clone(),
            metrics.clone(),
        ));
        let fx_cache = Arc::new(FxCache::new(
            config.base_currency,
            work.clone(),
            metrics.clone(),
        ));
        let position_cache = Arc::new(PositionCache::new(metrics.clone()));

        let retry_config = BackoffConfig::with_max_retries(config.dlq_max_retries);
        let broadcaster = Arc::new(ConflationBroadcaster::new(
            sink,
            dlq.clone(),
            metrics.clone(),
            retry_config.clone(),
        ));

        let router = ShardRouter::new(config.shard);
        let valuation = Arc::new(ValuationCore::new(
            price_cache.clone(),
            fx_cache.clone(),
            position_cache.clone(),
            registry,
            router,
            broadcaster.clone(),
            metrics.clone(),
        ));

        let flusher = Arc::new(PersistenceFlusher::new(
            dirty.clone(),
            price_cache.clone(),
            cold_store,
            dlq.clone(),
            metrics.clone(),
            retry_config,
            config.dirty_alert_threshold,
            Duration::from_millis(config.dirty_alert_window_ms),
        ));

        let gate = Arc::new(AdmissionGate::new(config.admission_permits()));
        let health = Arc::new(HealthMonitor::new(
            metrics.clone(),
            config.mailbox_high_water,
            config.consumer_lag_alert as i64,
        ));

        info!(
            shard_index = config.shard.index,
            shard_total = config.shard.total,
            workers = config.worker_pool_size,
            base_currency = %config.base_currency,
            "engine constructed"
        );

        Ok(Self {
            config,
            metrics,
            shutdown,
            active_threads: Arc::new(AtomicUsize::new(0)),
            price_cache,
            fx_cache,
            position_cache,
            dirty,
            broadcaster,
            valuation,
            flusher,
            gate,
            work,
            work_rx,
            dlq,
            health,
            handles: Vec::new(),
        })
    }

    /// Warm the caches from a snapshot source before intake begins.
    pub fn warm_from(&self, snapshot: &dyn SnapshotSource) -> Result<(), EngineError> {
        let positions = snapshot.positions()?;
        let accounts = positions.len();
        for (account_id, holdings) in positions {
            self.position_cache.bulk_replace(account_id, holdings);
        }

        let prices = snapshot.prices()?;
        let ticks = prices.len();
        for tick in prices {
            self.price_cache.put(tick);
        }

        info!(accounts, ticks, "caches warmed from snapshot");
        Ok(())
    }

    /// Spawn workers and tickers.
    pub fn start(&mut self) {
        for worker_id in 0..self.config.worker_pool_size {
            self.spawn_worker(worker_id);
        }
        self.spawn_conflation_ticker();
        self.spawn_persistence_ticker();
        self.spawn_stale_scanner();
        info!("engine started");
    }

    /// Spawn one intake loop for `consumer`'s topic stream.
    pub fn spawn_intake(&mut self, consumer: Box<dyn BrokerConsumer>) {
        let intake = TickIntake::new(
            self.price_cache.clone(),
            self.fx_cache.clone(),
            self.position_cache.clone(),
            self.work.clone(),
            self.dlq.clone(),
            self.metrics.clone(),
            self.config.queue_high_water,
            Duration::from_millis(self.config.broker.fetch_timeout_ms),
            self.shutdown.clone(),
        );
        let active = self.track_thread();
        let handle = std::thread::Builder::new()
            .name(format!("valo-intake-{}", consumer.group()))
            .spawn(move || {
                intake.run(consumer);
                active.fetch_sub(1, Ordering::AcqRel);
            });
        self.keep(handle);
    }

    fn spawn_worker(&mut self, worker_id: usize) {
        let rx = self.work_rx.clone();
        let valuation = self.valuation.clone();
        let gate = self.gate.clone();
        let shutdown = self.shutdown.clone();
        let metrics = self.metrics.clone();
        let active = self.track_thread();

        let handle = std::thread::Builder::new()
            .name(format!("valo-worker-{worker_id}"))
            .spawn(move || {
                while !shutdown.load(Ordering::Acquire) {
                    let mut item = match rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(item) => item,
                        Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
                        Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                    };
                    metrics.valuation().work_queue_depth.set(rx.len() as i64);

                    if !gate.try_acquire() {
                        metrics.valuation().ratelimit_rejected.inc();
                        continue;
                    }

                    advance_or_warn(&mut item, WorkState::Dispatched);
                    advance_or_warn(&mut item, WorkState::Computing);
                    let outcome = valuation.revalue(item.product_id);
                    if outcome.errors > 0 && outcome.emitted == 0 {
                        advance_or_warn(&mut item, WorkState::Failed);
                    } else {
                        advance_or_warn(&mut item, WorkState::BroadcastQueued);
                        advance_or_warn(&mut item, WorkState::Done);
                    }
                    if item.state() == WorkState::Failed {
                        metrics.valuation().work_items_failed.inc();
                        warn!(
                            product_id = item.product_id,
                            holders = outcome.errors,
                            "work item failed, no holder produced a valuation"
                        );
                    }
                    gate.release();
                }
                debug!(worker_id, "worker stopped");
                active.fetch_sub(1, Ordering::AcqRel);
            });
        self.keep(handle);
    }

    fn spawn_conflation_ticker(&mut self) {
        let broadcaster = self.broadcaster.clone();
        let shutdown = self.shutdown.clone();
        let period = self.config.conflation_period();
        let active = self.track_thread();

        let handle = std::thread::Builder::new()
            .name("valo-conflation".into())
            .spawn(move || {
                loop {
                    std::thread::sleep(period);
                    // Flag read once per tick
                    if shutdown.load(Ordering::Acquire) {
                        broadcaster.flush();
                        break;
                    }
                    broadcaster.flush();
                }
                debug!("conflation ticker stopped");
                active.fetch_sub(1, Ordering::AcqRel);
            });
        self.keep(handle);
    }

    fn spawn_persistence_ticker(&mut self) {
        let flusher = self.flusher.clone();
        let shutdown = self.shutdown.clone();
        let period = self.config.persistence_period();
        let active = self.track_thread();

        let handle = std::thread::Builder::new()
            .name("valo-persistence".into())
            .spawn(move || {
                loop {
                    std::thread::sleep(period);
                    if shutdown.load(Ordering::Acquire) {
                        flusher.flush_once();
                        break;
                    }
                    flusher.flush_once();
                }
                debug!("persistence ticker stopped");
                active.fetch_sub(1, Ordering::AcqRel);
            });
        self.keep(handle);
    }

    fn spawn_stale_scanner(&mut self) {
        let price_cache = self.price_cache.clone();
        let shutdown = self.shutdown.clone();
        let period = self.config.stale_scan_period();
        let active = self.track_thread();

        let handle = std::thread::Builder::new()
            .name("valo-stale-scan".into())
            .spawn(move || {
                let step = Duration::from_millis(100).min(period);
                let mut since_scan = Duration::ZERO;
                while !shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(step);
                    since_scan += step;
                    if since_scan >= period {
                        price_cache.scan_stale();
                        since_scan = Duration::ZERO;
                    }
                }
                debug!("stale scanner stopped");
                active.fetch_sub(1, Ordering::AcqRel);
            });
        self.keep(handle);
    }

    /// Graceful shutdown: stop polling, drain within the grace period, then
    /// force.
    pub fn shutdown(&mut self) -> ShutdownOutcome {
        info!("shutdown requested");
        self.shutdown.store(true, Ordering::Release);

        let deadline = Instant::now() + self.config.grace_shutdown();
        while self.active_threads.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                let remaining = self.active_threads.load(Ordering::Acquire);
                self.metrics.system().forced_shutdowns.inc();
                warn!(remaining, "grace period exceeded, forcing termination");
                self.handles.clear();
                return ShutdownOutcome::Forced;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        info!("shutdown complete");
        ShutdownOutcome::Graceful
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            ticks_received: self.metrics.intake().ticks_received.get(),
            parse_errors: self.metrics.intake().ticks_parse_errors.get(),
            valuations_submitted: self.metrics.broadcast().valuations_submitted.get(),
            dropped_by_conflation: self
                .metrics
                .broadcast()
                .valuations_dropped_by_conflation
                .get(),
            batches_emitted: self.metrics.broadcast().batches_emitted.get(),
            dlq_offers: self.metrics.intake().dlq_offers.get(),
            shard_skipped: self.metrics.valuation().shard_skipped.get(),
            ratelimit_rejected: self.metrics.valuation().ratelimit_rejected.get(),
            coldstore_appends: self.metrics.system().coldstore_appends.get(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ValoMetrics> {
        self.metrics.clone()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub fn price_cache(&self) -> Arc<PriceCache> {
        self.price_cache.clone()
    }

    pub fn fx_cache(&self) -> Arc<FxCache> {
        self.fx_cache.clone()
    }

    pub fn position_cache(&self) -> Arc<PositionCache> {
        self.position_cache.clone()
    }

    pub fn broadcaster(&self) -> Arc<ConflationBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn dirty_set(&self) -> Arc<DirtySet> {
        self.dirty.clone()
    }

    pub fn work_sender(&self) -> WorkSender {
        self.work.clone()
    }

    /// Flag handle for external shutdown triggers (ctrl-c handler).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn track_thread(&self) -> Arc<AtomicUsize> {
        self.active_threads.fetch_add(1, Ordering::AcqRel);
        self.active_threads.clone()
    }

    fn keep(&mut self, handle: std::io::Result<JoinHandle<()>>) {
        match handle {
            Ok(handle) => self.handles.push(handle),
            Err(e) => {
                // Failed spawn never ran, so give its slot back
                self.active_threads.fetch_sub(1, Ordering::AcqRel);
                warn!(error = %e, "thread spawn failed");
            }
        }
    }
}

/// Drive one FSM transition; a rejection means the worker loop skipped a
/// stage, which is a bug worth seeing in production logs, not just in tests.
fn advance_or_warn(item: &mut WorkItem, next: WorkState) {
    if let Err(from) = item.advance(next) {
        warn!(
            product_id = item.product_id,
            from = ?from,
            to = ?next,
            "work item transition rejected"
        );
    }
}
