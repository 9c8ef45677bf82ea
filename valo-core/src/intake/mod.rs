//! Tick intake: broker consumption, record decoding, DLQ routing.
//!
//! Batches are processed atomically for the purpose of acknowledgement:
//! per-record failures are routed to the dead-letter sink and never block the
//! batch. When the valuation work queue exceeds its high-water mark the ack
//! is deferred and no further batches are polled until the queue drains.

pub mod codec;
pub mod tcp;

use crate::cache::{FxCache, PositionCache, PriceCache};
use crate::core::{
    now_ns, AssetClass, Currency, EngineError, EodSnapshot, ErrorKind, PositionDelta, PriceTick,
    TimestampNs,
};
use crate::engine::valuation::WorkSender;
use crate::monitoring::ValoMetrics;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Inbound topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PriceTicks,
    FxRates,
    PositionUpdates,
    PositionsEod,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::PriceTicks,
        Topic::FxRates,
        Topic::PositionUpdates,
        Topic::PositionsEod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceTicks => "prices.ticks",
            Self::FxRates => "fx.rates",
            Self::PositionUpdates => "positions.updates",
            Self::PositionsEod => "positions.eod",
        }
    }

    pub fn from_name(name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

/// One record off the broker.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// A batch of records from one topic, acknowledged as a unit.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub topic: Topic,
    pub offset: u64,
    pub records: Vec<Record>,
}

impl RecordBatch {
    /// Convenience constructor for a single-record batch.
    pub fn single(topic: Topic, offset: u64, key: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            topic,
            offset,
            records: vec![Record { key, payload }],
        }
    }
}

/// Broker seam: poll batches, acknowledge manually.
pub trait BrokerConsumer: Send {
    /// Next batch, or None if the timeout elapsed with nothing to deliver.
    fn poll(&mut self, timeout: Duration) -> Result<Option<RecordBatch>, EngineError>;

    /// Acknowledge a batch previously returned by `poll`.
    fn ack(&mut self, topic: Topic, offset: u64) -> Result<(), EngineError>;

    /// Records behind the head of the stream, if the transport knows.
    fn lag(&self) -> Option<u64> {
        None
    }

    /// Consumer group name, used as the lag gauge label.
    fn group(&self) -> &str;
}

/// A record the engine gave up on.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqRecord {
    pub original_topic: String,
    pub key: Option<String>,
    pub payload: String,
    pub error_message: String,
    pub error_kind: ErrorKind,
    pub timestamp: TimestampNs,
}

/// Dead-letter seam.
pub trait DeadLetterSink: Send + Sync {
    fn offer(&self, topic: &str, key: Option<&str>, payload: &[u8], error: &str, kind: ErrorKind);
}

/// DLQ sink that logs each record; default for deployments where the DLQ
/// topic is wired up out of process.
pub struct LoggingDlq;

impl DeadLetterSink for LoggingDlq {
    fn offer(&self, topic: &str, key: Option<&str>, payload: &[u8], error: &str, kind: ErrorKind) {
        warn!(
            topic,
            key,
            kind = kind.as_str(),
            error,
            payload = %String::from_utf8_lossy(payload),
            "record dead-lettered"
        );
    }
}

/// DLQ sink that collects records; used by tests and the replay binary.
#[derive(Default)]
pub struct CollectingDlq {
    records: parking_lot::Mutex<Vec<DlqRecord>>,
}

impl CollectingDlq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<DlqRecord> {
        std::mem::take(&mut self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for CollectingDlq {
    fn offer(&self, topic: &str, key: Option<&str>, payload: &[u8], error: &str, kind: ErrorKind) {
        self.records.lock().push(DlqRecord {
            original_topic: topic.to_string(),
            key: key.map(str::to_string),
            payload: String::from_utf8_lossy(payload).into_owned(),
            error_message: error.to_string(),
            error_kind: kind,
            timestamp: now_ns(),
        });
    }
}

/// In-process broker backed by a channel; the transport for tests and the
/// replay binary.
pub struct InProcessConsumer {
    rx: crossbeam::channel::Receiver<RecordBatch>,
    acked: Arc<AtomicU64>,
    group: String,
}

impl InProcessConsumer {
    pub fn acked_batches(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }
}

/// Build a connected (sender, consumer) pair.
pub fn in_process_feed(
    group: impl Into<String>,
) -> (crossbeam::channel::Sender<RecordBatch>, InProcessConsumer) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let consumer = InProcessConsumer {
        rx,
        acked: Arc::new(AtomicU64::new(0)),
        group: group.into(),
    };
    (tx, consumer)
}

impl BrokerConsumer for InProcessConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RecordBatch>, EngineError> {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => Ok(Some(batch)),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn ack(&mut self, _topic: Topic, _offset: u64) -> Result<(), EngineError> {
        self.acked.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn lag(&self) -> Option<u64> {
        Some(self.rx.len() as u64)
    }

    fn group(&self) -> &str {
        &self.group
    }
}

/// Outcome of processing one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

// Wire shapes for the tick topics. Decoded loosely so semantic rejection
// (unknown asset class, bad currency, negative values) is distinguishable
// from a malformed record.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPriceTick {
    product_id: u64,
    price: Decimal,
    currency: String,
    asset_class: String,
    #[serde(default)]
    source: String,
    source_priority: u8,
    timestamp: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFxRate {
    pair: String,
    rate: Decimal,
    timestamp: u64,
}

/// Decodes records and routes them into the hot caches.
pub struct TickIntake {
    price_cache: Arc<PriceCache>,
    fx_cache: Arc<FxCache>,
    position_cache: Arc<PositionCache>,
    work: WorkSender,
    dlq: Arc<dyn DeadLetterSink>,
    metrics: Arc<ValoMetrics>,
    queue_high_water: usize,
    fetch_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl TickIntake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        price_cache: Arc<PriceCache>,
        fx_cache: Arc<FxCache>,
        position_cache: Arc<PositionCache>,
        work: WorkSender,
        dlq: Arc<dyn DeadLetterSink>,
        metrics: Arc<ValoMetrics>,
        queue_high_water: usize,
        fetch_timeout: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            price_cache,
            fx_cache,
            position_cache,
            work,
            dlq,
            metrics,
            queue_high_water,
            fetch_timeout,
            shutdown,
        }
    }

    /// Poll-process-ack loop; returns when the shutdown flag is set.
    pub fn run(&self, mut consumer: Box<dyn BrokerConsumer>) {
        let group = consumer.group().to_string();
        debug!(group, "intake loop started");

        while !self.shutdown.load(Ordering::Acquire) {
            if let Some(lag) = consumer.lag() {
                self.metrics
                    .intake()
                    .consumer_lag
                    .with_label_values(&[&group])
                    .set(lag as i64);
                self.metrics.intake().consumer_lag_max.set(lag as i64);
            }

            let batch = match consumer.poll(self.fetch_timeout) {
                Ok(Some(batch)) => batch,
                Ok(None) => continue,
                Err(e) => {
                    warn!(group, error = %e, "broker poll failed");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };

            let outcome = self.process_batch(&batch);
            debug!(
                group,
                topic = batch.topic.as_str(),
                processed = outcome.processed,
                failed = outcome.failed,
                "batch processed"
            );

            // Backpressure: hold the ack (and the next poll) until the work
            // queue drains below high water.
            if self.work.depth() > self.queue_high_water {
                self.metrics.intake().backpressure_deferrals.inc();
                while self.work.depth() > self.queue_high_water
                    && !self.shutdown.load(Ordering::Acquire)
                {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }

            if let Err(e) = consumer.ack(batch.topic, batch.offset) {
                warn!(group, error = %e, "ack failed");
            }
        }
        debug!(group, "intake loop stopped");
    }

    /// Process every record in `batch`; failures are DLQ'd per record and do
    /// not block the rest of the batch.
    pub fn process_batch(&self, batch: &RecordBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for record in &batch.records {
            match self.dispatch(batch.topic, record) {
                Ok(()) => outcome.processed += 1,
                Err(error) => {
                    outcome.failed += 1;
                    self.route_failure(batch.topic, record, error);
                }
            }
        }
        outcome
    }

    fn dispatch(&self, topic: Topic, record: &Record) -> Result<(), EngineError> {
        match topic {
            Topic::PriceTicks => {
                self.metrics.intake().ticks_received.inc();
                self.handle_price(&record.payload)
            }
            Topic::FxRates => {
                self.metrics.intake().ticks_received.inc();
                self.handle_fx(&record.payload)
            }
            Topic::PositionUpdates => self.handle_position(&record.payload),
            Topic::PositionsEod => self.handle_eod(&record.payload),
        }
    }

    fn handle_price(&self, payload: &[u8]) -> Result<(), EngineError> {
        let raw: RawPriceTick = decode(payload)?;

        let currency: Currency = raw
            .currency
            .parse()
            .map_err(EngineError::Validation)?;
        let asset_class: AssetClass = raw
            .asset_class
            .parse()
            .map_err(EngineError::Validation)?;
        if raw.price < Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "negative price {} for product {}",
                raw.price, raw.product_id
            )));
        }

        self.fx_cache
            .register_product_currency(raw.product_id, currency);
        self.price_cache.put(PriceTick {
            product_id: raw.product_id,
            price: raw.price,
            currency,
            asset_class,
            source: raw.source,
            source_priority: raw.source_priority,
            timestamp_ns: raw.timestamp,
            stale: false,
        });
        Ok(())
    }

    fn handle_fx(&self, payload: &[u8]) -> Result<(), EngineError> {
        let raw: RawFxRate = decode(payload)?;

        let pair = raw.pair.parse().map_err(EngineError::Validation)?;
        if raw.rate <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "non-positive rate {} for pair {}",
                raw.rate, raw.pair
            )));
        }

        self.fx_cache.put(crate::core::FxRate {
            pair,
            rate: raw.rate,
            timestamp_ns: raw.timestamp,
        });
        Ok(())
    }

    fn handle_position(&self, payload: &[u8]) -> Result<(), EngineError> {
        let delta: PositionDelta = decode(payload)?;
        self.position_cache
            .set_quantity(delta.account_id, delta.product_id, delta.quantity);
        Ok(())
    }

    fn handle_eod(&self, payload: &[u8]) -> Result<(), EngineError> {
        let snapshot: EodSnapshot = decode(payload)?;
        debug!(
            account_id = snapshot.account_id,
            business_date = %snapshot.business_date,
            positions = snapshot.positions.len(),
            "eod snapshot received"
        );
        self.position_cache.bulk_replace(
            snapshot.account_id,
            snapshot
                .positions
                .into_iter()
                .map(|p| (p.product_id, p.quantity))
                .collect(),
        );
        Ok(())
    }

    fn route_failure(&self, topic: Topic, record: &Record, error: EngineError) {
        let Some(kind) = error.dlq_kind() else {
            warn!(topic = topic.as_str(), error = %error, "non-DLQ record failure");
            return;
        };
        match kind {
            ErrorKind::Parse => self.metrics.intake().ticks_parse_errors.inc(),
            ErrorKind::Validation => self.metrics.intake().validation_errors.inc(),
            ErrorKind::Processing => {}
        }
        self.metrics.intake().dlq_offers.inc();
        self.dlq.offer(
            topic.as_str(),
            record.key.as_deref(),
            &record.payload,
            &error.to_string(),
            kind,
        );
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, EngineError> {
    serde_json::from_slice(payload).map_err(|e| EngineError::Parse(e.to_string()))
}
