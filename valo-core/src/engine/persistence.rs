//! Persistence flusher: dirty-product set drained to the cold price store on
//! a fixed cadence.
//!
//! Price-cache writes mark products dirty. Each flush atomically drains the
//! set, reads the current tick per product, and appends one batch. On append
//! failure the drained ids are reinserted (idempotent) and an alert is raised
//! once the set stays over threshold beyond the alert window.

use crate::cache::PriceCache;
use crate::core::{ErrorKind, EngineError, PriceTick, ProductId};
use crate::intake::DeadLetterSink;
use crate::monitoring::ValoMetrics;
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Set of products awaiting a cold-store append.
pub struct DirtySet {
    set: DashSet<ProductId>,
    metrics: Arc<ValoMetrics>,
}

impl DirtySet {
    pub fn new(metrics: Arc<ValoMetrics>) -> Self {
        Self {
            set: DashSet::new(),
            metrics,
        }
    }

    /// Mark a product dirty. Idempotent.
    pub fn mark(&self, product_id: ProductId) {
        if self.set.insert(product_id) {
            self.metrics
                .system()
                .dirty_products
                .set(self.set.len() as i64);
        }
    }

    /// Remove and return everything currently marked.
    pub fn drain(&self) -> Vec<ProductId> {
        let ids: Vec<ProductId> = self.set.iter().map(|entry| *entry).collect();
        for id in &ids {
            self.set.remove(id);
        }
        self.metrics
            .system()
            .dirty_products
            .set(self.set.len() as i64);
        ids
    }

    /// Put ids back after a failed append.
    pub fn reinsert(&self, ids: &[ProductId]) {
        for id in ids {
            self.set.insert(*id);
        }
        self.metrics
            .system()
            .dirty_products
            .set(self.set.len() as i64);
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Cold price store seam.
pub trait ColdStore: Send + Sync {
    fn append_batch(&self, ticks: &[PriceTick]) -> Result<(), EngineError>;
}

/// Append-only JSON-lines cold store, one tick per line.
pub struct JsonlColdStore {
    file: Mutex<std::fs::File>,
}

impl JsonlColdStore {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Fatal(format!("cold store dir: {e}")))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::Fatal(format!("cold store open {}: {e}", path.display())))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ColdStore for JsonlColdStore {
    fn append_batch(&self, ticks: &[PriceTick]) -> Result<(), EngineError> {
        let mut buffer = Vec::with_capacity(ticks.len() * 128);
        for tick in ticks {
            serde_json::to_writer(&mut buffer, tick)
                .map_err(|e| EngineError::Processing(format!("cold store encode: {e}")))?;
            buffer.push(b'\n');
        }
        let mut file = self.file.lock();
        file.write_all(&buffer)
            .and_then(|_| file.flush())
            .map_err(|e| EngineError::Processing(format!("cold store append: {e}")))
    }
}

/// In-memory cold store for tests and replay runs.
#[derive(Default)]
pub struct InMemoryColdStore {
    batches: Mutex<Vec<Vec<PriceTick>>>,
    fail_next: std::sync::atomic::AtomicUsize,
}

impl InMemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next
            .store(n, std::sync::atomic::Ordering::Release);
    }

    pub fn batches(&self) -> Vec<Vec<PriceTick>> {
        self.batches.lock().clone()
    }

    pub fn appended(&self) -> usize {
        self.batches.lock().iter().map(|b| b.len()).sum()
    }
}

impl ColdStore for InMemoryColdStore {
    fn append_batch(&self, ticks: &[PriceTick]) -> Result<(), EngineError> {
        let remaining = self.fail_next.load(std::sync::atomic::Ordering::Acquire);
        if remaining > 0 {
            self.fail_next
                .store(remaining - 1, std::sync::atomic::Ordering::Release);
            return Err(EngineError::Processing("injected append failure".into()));
        }
        self.batches.lock().push(ticks.to_vec());
        Ok(())
    }
}

/// Drains the dirty set to the cold store.
pub struct PersistenceFlusher {
    dirty: Arc<DirtySet>,
    price_cache: Arc<PriceCache>,
    store: Arc<dyn ColdStore>,
    dlq: Arc<dyn DeadLetterSink>,
    metrics: Arc<ValoMetrics>,
    retry_config: BackoffConfig,
    alert_threshold: usize,
    alert_window: Duration,
    breach_since: Mutex<Option<Instant>>,
}

impl PersistenceFlusher {
    pub fn new(
        dirty: Arc<DirtySet>,
        price_cache: Arc<PriceCache>,
        store: Arc<dyn ColdStore>,
        dlq: Arc<dyn DeadLetterSink>,
        metrics: Arc<ValoMetrics>,
        retry_config: BackoffConfig,
        alert_threshold: usize,
        alert_window: Duration,
    ) -> Self {
        Self {
            dirty,
            price_cache,
            store,
            dlq,
            metrics,
            retry_config,
            alert_threshold,
            alert_window,
            breach_since: Mutex::new(None),
        }
    }

    /// One flush pass. Returns the number of ticks appended.
    pub fn flush_once(&self) -> usize {
        let ids = self.dirty.drain();
        if ids.is_empty() {
            self.check_alert();
            return 0;
        }

        let ticks: Vec<PriceTick> = self
            .price_cache
            .bulk_get(&ids)
            .into_values()
            .collect();
        if ticks.is_empty() {
            self.check_alert();
            return 0;
        }

        let mut backoff = ExponentialBackoff::with_config(self.retry_config.clone());
        loop {
            match self.store.append_batch(&ticks) {
                Ok(()) => {
                    self.metrics.system().coldstore_appends.inc();
                    debug!(count = ticks.len(), "cold store batch appended");
                    self.check_alert();
                    return ticks.len();
                }
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(error = %e, ?delay, "cold store append failed, retrying");
                        std::thread::sleep(delay);
                    }
                    None => {
                        self.metrics.system().coldstore_errors.inc();
                        self.metrics.intake().dlq_offers.inc();
                        self.dirty.reinsert(&ids);
                        let payload = serde_json::to_vec(&ticks).unwrap_or_default();
                        self.dlq.offer(
                            "prices.ticks",
                            None,
                            &payload,
                            &e.to_string(),
                            ErrorKind::Processing,
                        );
                        self.check_alert();
                        return 0;
                    }
                },
            }
        }
    }

    /// Raise an alert when the dirty set stays above threshold longer than
    /// the alert window.
    fn check_alert(&self) {
        let mut breach = self.breach_since.lock();
        if self.dirty.len() > self.alert_threshold {
            let since = breach.get_or_insert_with(Instant::now);
            if since.elapsed() >= self.alert_window {
                error!(
                    dirty = self.dirty.len(),
                    threshold = self.alert_threshold,
                    "dirty set over threshold beyond alert window"
                );
            }
        } else {
            *breach = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{now_ns, AssetClass, Currency};
    use crate::engine::valuation::work_channel;
    use crate::intake::CollectingDlq;
    use rust_decimal_macros::dec;

    struct Harness {
        flusher: PersistenceFlusher,
        dirty: Arc<DirtySet>,
        prices: Arc<PriceCache>,
        store: Arc<InMemoryColdStore>,
        dlq: Arc<CollectingDlq>,
    }

    fn harness(retries: usize) -> Harness {
        let metrics = Arc::new(ValoMetrics::new().unwrap());
        let (work, _rx) = work_channel(metrics.clone());
        let dirty = Arc::new(DirtySet::new(metrics.clone()));
        let prices = Arc::new(PriceCache::new(
            Duration::from_secs(1_800),
            work,
            dirty.clone(),
            metrics.clone(),
        ));
        let store = Arc::new(InMemoryColdStore::new());
        let dlq = Arc::new(CollectingDlq::new());
        let flusher = PersistenceFlusher::new(
            dirty.clone(),
            prices.clone(),
            store.clone(),
            dlq.clone(),
            metrics,
            BackoffConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                max_retries: Some(retries),
                jitter_factor: 0.0,
            },
            1_000,
            Duration::from_secs(10),
        );
        Harness {
            flusher,
            dirty,
            prices,
            store,
            dlq,
        }
    }

    fn tick(product_id: ProductId) -> PriceTick {
        PriceTick {
            product_id,
            price: dec!(1.5),
            currency: Currency::USD,
            asset_class: AssetClass::Equity,
            source: "TEST".into(),
            source_priority: 1,
            timestamp_ns: now_ns(),
            stale: false,
        }
    }

    #[test]
    fn flush_drains_and_appends_current_ticks() {
        let h = harness(0);
        h.prices.put(tick(1));
        h.prices.put(tick(2));
        assert_eq!(h.dirty.len(), 2);

        let appended = h.flusher.flush_once();
        assert_eq!(appended, 2);
        assert!(h.dirty.is_empty());
        assert_eq!(h.store.appended(), 2);

        // Nothing new, nothing flushed
        assert_eq!(h.flusher.flush_once(), 0);
    }

    #[test]
    fn failed_append_reinserts_ids_and_dead_letters() {
        let h = harness(1);
        h.prices.put(tick(1));
        h.store.fail_next(2); // initial attempt + one retry both fail

        assert_eq!(h.flusher.flush_once(), 0);
        assert_eq!(h.dirty.len(), 1);
        let records = h.dlq.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_kind, ErrorKind::Processing);

        // Next pass succeeds and drains the reinserted id
        assert_eq!(h.flusher.flush_once(), 1);
        assert!(h.dirty.is_empty());
    }

    #[test]
    fn retry_recovers_within_one_pass() {
        let h = harness(2);
        h.prices.put(tick(1));
        h.store.fail_next(1);

        assert_eq!(h.flusher.flush_once(), 1);
        assert!(h.dirty.is_empty());
        assert!(h.dlq.is_empty());
    }

    #[test]
    fn dirty_mark_is_idempotent() {
        let h = harness(0);
        h.dirty.mark(5);
        h.dirty.mark(5);
        assert_eq!(h.dirty.len(), 1);

        let drained = h.dirty.drain();
        assert_eq!(drained, vec![5]);
        assert!(h.dirty.is_empty());
    }

    #[test]
    fn jsonl_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.jsonl");
        let store = JsonlColdStore::open(&path).unwrap();

        store.append_batch(&[tick(1), tick(2)]).unwrap();
        store.append_batch(&[tick(3)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: PriceTick = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.price, dec!(1.5));
    }
}
