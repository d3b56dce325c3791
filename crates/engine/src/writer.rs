//! Bulk writer and the worker task that owns it.
//!
//! The tick loop never performs store I/O. It hands finished batches to the
//! writer worker over a bounded channel; the worker appends them to the
//! `BulkWriter` and flushes with a single bulk insert. A failed flush leaves
//! every pending row in place for the next attempt.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tickwise_core::{IndicatorValue, StoreError, TimeSeriesStore};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::WriterConfig;
use crate::stats::SchedulerStats;
use crate::EngineError;

/// Buffers indicator rows and writes them in one bulk insert.
pub struct BulkWriter {
    store: Arc<dyn TimeSeriesStore>,
    pending: VecDeque<IndicatorValue>,
    max_pending: usize,
    stats: Arc<SchedulerStats>,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn TimeSeriesStore>, max_pending: usize, stats: Arc<SchedulerStats>) -> Self {
        Self {
            store,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            stats,
        }
    }

    /// Append one row. No I/O.
    pub fn add(&mut self, row: IndicatorValue) {
        self.extend(std::iter::once(row));
    }

    /// Append rows, dropping the oldest pending ones past the memory ceiling.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = IndicatorValue>) {
        self.pending.extend(rows);
        let overflow = self.pending.len().saturating_sub(self.max_pending);
        if overflow > 0 {
            self.pending.drain(..overflow);
            SchedulerStats::add(&self.stats.rows_dropped, overflow as u64);
            warn!(
                dropped = overflow,
                ceiling = self.max_pending,
                "Pending indicator rows exceeded ceiling; dropped oldest"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write every pending row with one `bulk_insert` call. Rows are cleared
    /// only once the store reports success. An encoding rejection is
    /// permanent: unstorable rows are dropped and the rest written.
    pub async fn flush(&mut self) -> Result<usize, StoreError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        match self.insert_pending().await {
            Err(StoreError::Encode(reason)) => {
                self.drop_unstorable(&reason);
                if self.pending.is_empty() {
                    return Ok(0);
                }
                self.insert_pending().await
            }
            other => other,
        }
    }

    async fn insert_pending(&mut self) -> Result<usize, StoreError> {
        let rows = self.pending.make_contiguous();
        match self.store.bulk_insert(rows).await {
            Ok(_) => {
                let written = self.pending.len();
                self.pending.clear();
                SchedulerStats::add(&self.stats.rows_written, written as u64);
                SchedulerStats::add(&self.stats.flushes, 1);
                debug!(rows = written, "Flushed indicator rows");
                Ok(written)
            }
            Err(e) => {
                SchedulerStats::add(&self.stats.flush_failures, 1);
                Err(e)
            }
        }
    }

    fn drop_unstorable(&mut self, reason: &str) {
        let before = self.pending.len();
        self.pending.retain(|row| is_storable(row.value));
        // Store rejected rows we consider valid; retrying would fail forever.
        if self.pending.len() == before {
            self.pending.clear();
        }
        let dropped = before - self.pending.len();
        SchedulerStats::add(&self.stats.rows_dropped, dropped as u64);
        warn!(
            dropped = dropped,
            remaining = self.pending.len(),
            reason = %reason,
            "Store cannot encode indicator rows; dropped them"
        );
    }
}

/// Whether `value` fits the store's NUMERIC column (finite and within
/// `Decimal` range).
pub fn is_storable(value: f64) -> bool {
    Decimal::try_from(value).is_ok()
}

/// Messages accepted by the writer worker.
#[derive(Debug)]
pub enum WriterMessage {
    Batch(Vec<IndicatorValue>),
    /// Final flush, then exit.
    Shutdown(oneshot::Sender<Result<usize, StoreError>>),
}

/// Handle to a running writer worker.
pub struct WriterHandle {
    tx: mpsc::Sender<WriterMessage>,
    task: JoinHandle<()>,
}

impl WriterHandle {
    pub fn sender(&self) -> mpsc::Sender<WriterMessage> {
        self.tx.clone()
    }

    /// Ask the worker to flush everything and stop.
    pub async fn shutdown(self) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriterMessage::Shutdown(reply_tx))
            .await
            .map_err(|_| EngineError::WriterClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::WriterClosed)?;
        self.task
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?;
        Ok(result?)
    }
}

/// Spawn the writer worker on the current runtime.
pub fn spawn_writer(
    store: Arc<dyn TimeSeriesStore>,
    config: &WriterConfig,
    stats: Arc<SchedulerStats>,
) -> WriterHandle {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let writer = BulkWriter::new(store, config.max_pending_rows, stats);
    let task = tokio::spawn(run_writer(writer, rx, config.retry_interval()));
    WriterHandle { tx, task }
}

async fn run_writer(
    mut writer: BulkWriter,
    mut rx: mpsc::Receiver<WriterMessage>,
    retry_every: Duration,
) {
    let mut retry = interval(retry_every);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Writer worker started");

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(WriterMessage::Batch(rows)) => {
                    writer.extend(rows);
                    flush_logged(&mut writer).await;
                }
                Some(WriterMessage::Shutdown(reply)) => {
                    let result = writer.flush().await;
                    if let Err(e) = &result {
                        error!(pending = writer.len(), error = %e, "Final flush failed");
                    }
                    let _ = reply.send(result);
                    break;
                }
                None => {
                    flush_logged(&mut writer).await;
                    break;
                }
            },
            _ = retry.tick(), if !writer.is_empty() => {
                flush_logged(&mut writer).await;
            }
        }
    }

    info!(pending = writer.len(), "Writer worker stopped");
}

async fn flush_logged(writer: &mut BulkWriter) {
    if let Err(e) = writer.flush().await {
        warn!(pending = writer.len(), error = %e, "Bulk insert failed; will retry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingStore;
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use tickwise_core::{IndicatorParams, IndicatorSpec};

    fn row(value: f64) -> IndicatorValue {
        let spec = IndicatorSpec::new("BTC_USDT", IndicatorParams::Sma { period: 3 });
        IndicatorValue::new(&spec, value, Utc::now())
    }

    #[tokio::test]
    async fn test_flush_writes_all_rows_in_one_call() {
        let store = Arc::new(RecordingStore::default());
        let stats = Arc::new(SchedulerStats::new());
        let mut writer = BulkWriter::new(store.clone(), 1_000, stats.clone());

        let input: Vec<IndicatorValue> = (0..250).map(|i| row(i as f64)).collect();
        // Added across several "ticks"
        for chunk in input.chunks(100) {
            writer.extend(chunk.to_vec());
        }
        assert_eq!(writer.flush().await.unwrap(), 250);
        assert!(writer.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*store.rows.lock().unwrap(), input);
        assert_eq!(stats.snapshot().rows_written, 250);

        // Nothing pending: no store call
        assert_eq!(writer.flush().await.unwrap(), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_batch() {
        let store = Arc::new(RecordingStore::default());
        let stats = Arc::new(SchedulerStats::new());
        let mut writer = BulkWriter::new(store.clone(), 1_000, stats.clone());

        store.failing.store(true, Ordering::SeqCst);
        writer.add(row(1.0));
        writer.add(row(2.0));
        assert!(writer.flush().await.is_err());
        assert_eq!(writer.len(), 2);

        writer.add(row(3.0));
        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(writer.flush().await.unwrap(), 3);

        let values: Vec<f64> = store.rows.lock().unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        let snap = stats.snapshot();
        assert_eq!(snap.flush_failures, 1);
        assert_eq!(snap.flushes, 1);
    }

    #[tokio::test]
    async fn test_unencodable_rows_dropped_rest_written() {
        let store = Arc::new(RecordingStore::default());
        let stats = Arc::new(SchedulerStats::new());
        let mut writer = BulkWriter::new(store.clone(), 1_000, stats.clone());

        writer.extend(vec![row(1.0), row(f64::INFINITY), row(2.0), row(1e29)]);
        assert_eq!(writer.flush().await.unwrap(), 2);
        assert!(writer.is_empty());

        let values: Vec<f64> = store.rows().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
        let snap = stats.snapshot();
        assert_eq!(snap.rows_dropped, 2);
        assert_eq!(snap.rows_written, 2);
        assert_eq!(snap.flush_failures, 1);
    }

    #[test]
    fn test_is_storable() {
        assert!(is_storable(0.0));
        assert!(is_storable(-42_000.125));
        assert!(is_storable(1e28));
        assert!(!is_storable(1e29));
        assert!(!is_storable(f64::NAN));
        assert!(!is_storable(f64::NEG_INFINITY));
    }

    #[tokio::test]
    async fn test_ceiling_drops_oldest() {
        let store = Arc::new(RecordingStore::default());
        let stats = Arc::new(SchedulerStats::new());
        let mut writer = BulkWriter::new(store.clone(), 3, stats.clone());

        writer.extend((1..=5).map(|i| row(i as f64)));
        assert_eq!(writer.len(), 3);
        assert_eq!(stats.snapshot().rows_dropped, 2);

        writer.flush().await.unwrap();
        let values: Vec<f64> = store.rows.lock().unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_worker_retries_and_final_flush() {
        let store = Arc::new(RecordingStore::default());
        let stats = Arc::new(SchedulerStats::new());
        let config = WriterConfig {
            retry_interval_ms: 10,
            ..Default::default()
        };

        store.failing.store(true, Ordering::SeqCst);
        let handle = spawn_writer(store.clone(), &config, stats.clone());
        handle
            .sender()
            .send(WriterMessage::Batch(vec![row(1.0), row(2.0)]))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stats.snapshot().flush_failures >= 1);
        assert!(store.rows.lock().unwrap().is_empty());

        store.failing.store(false, Ordering::SeqCst);
        handle.shutdown().await.unwrap();
        assert_eq!(store.rows.lock().unwrap().len(), 2);
        assert_eq!(stats.snapshot().rows_written, 2);
    }
}
