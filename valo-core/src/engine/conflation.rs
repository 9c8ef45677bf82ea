//! Conflation broadcaster.
//!
//! Per-account mailbox holding the latest valuation per product between
//! flushes. `submit` is non-blocking and contends only on the submitting
//! account's shard. On flush, each non-empty inner map is detached and its
//! values are emitted as one batch addressed to the account's subscriber
//! topic. Within a window, latest `computed_at` wins per (account, product).

use crate::core::{AccountId, EngineError, ProductId, Valuation};
use crate::intake::DeadLetterSink;
use crate::monitoring::ValoMetrics;
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Downstream subscriber transport.
///
/// One batch per account per flush, addressed to the account's topic.
pub trait SubscriberSink: Send + Sync {
    fn emit(&self, account_id: AccountId, batch: &[Valuation]) -> Result<(), EngineError>;
}

/// Topic an account's updates are published on.
pub fn account_topic(account_id: AccountId) -> String {
    format!("/topic/account/{account_id}")
}

/// Result of one flush pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub accounts: usize,
    pub valuations: usize,
}

pub struct ConflationBroadcaster {
    mailbox: DashMap<AccountId, HashMap<ProductId, Valuation>>,
    sink: Arc<dyn SubscriberSink>,
    dlq: Arc<dyn DeadLetterSink>,
    metrics: Arc<ValoMetrics>,
    depth: AtomicI64,
    retry_config: BackoffConfig,
}

impl ConflationBroadcaster {
    pub fn new(
        sink: Arc<dyn SubscriberSink>,
        dlq: Arc<dyn DeadLetterSink>,
        metrics: Arc<ValoMetrics>,
        retry_config: BackoffConfig,
    ) -> Self {
        Self {
            mailbox: DashMap::new(),
            sink,
            dlq,
            metrics,
            depth: AtomicI64::new(0),
            retry_config,
        }
    }

    /// Buffer `valuation`, silently dropping the older of the two when the
    /// same (account, product) is already buffered in this window.
    ///
    /// Greatest `computed_at` wins, whatever the submission order - workers
    /// race on distinct holders of the same product.
    pub fn submit(&self, valuation: Valuation) {
        let account_id = valuation.account_id;
        let product_id = valuation.product_id;

        let mut inner = self.mailbox.entry(account_id).or_default();
        let superseded = inner
            .get(&product_id)
            .map(|existing| existing.computed_at > valuation.computed_at)
            .unwrap_or(false);
        let new_entry = if superseded {
            false
        } else {
            inner.insert(product_id, valuation).is_none()
        };
        drop(inner);

        self.metrics.broadcast().valuations_submitted.inc();
        if new_entry {
            let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
            self.metrics.broadcast().mailbox_depth.set(depth);
        } else {
            self.metrics
                .broadcast()
                .valuations_dropped_by_conflation
                .inc();
        }
    }

    /// Detach and emit every non-empty inner map.
    ///
    /// Detachment happens under the shard lock; emission happens after, so no
    /// lock is held across the sink call.
    pub fn flush(&self) -> FlushStats {
        let mut batches: Vec<(AccountId, Vec<Valuation>)> = Vec::new();
        for mut entry in self.mailbox.iter_mut() {
            if entry.is_empty() {
                continue;
            }
            let detached = std::mem::take(entry.value_mut());
            batches.push((*entry.key(), detached.into_values().collect()));
        }

        let mut stats = FlushStats::default();
        for (account_id, batch) in batches {
            stats.accounts += 1;
            stats.valuations += batch.len();
            let depth = self.depth.fetch_sub(batch.len() as i64, Ordering::AcqRel)
                - batch.len() as i64;
            self.metrics.broadcast().mailbox_depth.set(depth.max(0));
            self.emit_with_retry(account_id, batch);
        }
        stats
    }

    fn emit_with_retry(&self, account_id: AccountId, batch: Vec<Valuation>) {
        let mut backoff = ExponentialBackoff::with_config(self.retry_config.clone());

        loop {
            match self.sink.emit(account_id, &batch) {
                Ok(()) => {
                    self.metrics.broadcast().batches_emitted.inc();
                    debug!(account_id, size = batch.len(), "batch emitted");
                    return;
                }
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(account_id, error = %e, ?delay, "emit failed, retrying");
                        std::thread::sleep(delay);
                    }
                    None => {
                        self.metrics.broadcast().emit_errors.inc();
                        self.metrics.intake().dlq_offers.inc();
                        let payload = serde_json::to_vec(&batch).unwrap_or_default();
                        self.dlq.offer(
                            &account_topic(account_id),
                            Some(&account_id.to_string()),
                            &payload,
                            &e.to_string(),
                            crate::core::ErrorKind::Processing,
                        );
                        return;
                    }
                },
            }
        }
    }

    /// Entries currently buffered.
    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::Acquire).max(0)
    }
}

/// Sink that logs each batch; the default for the live binary where the
/// subscriber transport is deployed separately.
pub struct TracingSink;

impl SubscriberSink for TracingSink {
    fn emit(&self, account_id: AccountId, batch: &[Valuation]) -> Result<(), EngineError> {
        tracing::info!(
            topic = %account_topic(account_id),
            size = batch.len(),
            "valuation batch"
        );
        Ok(())
    }
}

/// Sink that collects every emission; used by tests and the replay binary.
#[derive(Default)]
pub struct CollectingSink {
    emissions: parking_lot::Mutex<Vec<(AccountId, Vec<Valuation>)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(AccountId, Vec<Valuation>)> {
        std::mem::take(&mut self.emissions.lock())
    }

    pub fn emission_count(&self) -> usize {
        self.emissions.lock().len()
    }

    /// All valuations emitted so far, flattened.
    pub fn all_valuations(&self) -> Vec<Valuation> {
        self.emissions
            .lock()
            .iter()
            .flat_map(|(_, batch)| batch.iter().cloned())
            .collect()
    }
}

impl SubscriberSink for CollectingSink {
    fn emit(&self, account_id: AccountId, batch: &[Valuation]) -> Result<(), EngineError> {
        self.emissions.lock().push((account_id, batch.to_vec()));
        Ok(())
    }
}
