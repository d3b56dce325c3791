//! Fixed-interval tick loop.
//!
//! Responsibilities:
//! - Once per tick, pull the latest sample per symbol and update every
//!   registered indicator instance from a registry snapshot.
//! - Collect outputs into a write batch and hand full or stale batches to the
//!   writer worker.
//!
//! Non-responsibilities:
//! - Store I/O (the writer worker does this off the tick loop).
//! - Market data ingestion (anything that publishes into the feed).
//!
//! Properties:
//! - One logical thread of control touches indicator state, so updates to
//!   the same instance are strictly ordered across ticks.
//! - A tick is never interrupted half way: shutdown is only observed between
//!   ticks.
//! - A failing instance is recorded and skipped; siblings still update.

use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tickwise_core::{IndicatorValue, Sample, SampleFeed, TimeSeriesStore};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, WriterConfig};
use crate::registry::IndicatorRegistry;
use crate::stats::{SchedulerStats, StatsSnapshot};
use crate::writer::{spawn_writer, WriterHandle, WriterMessage};
use crate::EngineError;

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    /// Live instances in the snapshot.
    pub instances: usize,
    /// Successful `update` calls, including those still warming up.
    pub updates: usize,
    /// Defined values added to the write batch.
    pub values: usize,
    pub errors: usize,
    /// Rows handed to the writer at the end of this tick.
    pub handed_off: usize,
}

#[derive(Debug, Default)]
struct WriteBatch {
    rows: Vec<IndicatorValue>,
    opened_at: Option<Instant>,
}

impl WriteBatch {
    fn push(&mut self, row: IndicatorValue) {
        if self.rows.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.rows.push(row);
    }

    fn should_flush(&self, config: &WriterConfig) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.rows.len() >= config.flush_max_rows
            || self
                .opened_at
                .map(|t| t.elapsed() >= config.flush_max_age())
                .unwrap_or(false)
    }
}

/// Runs single ticks against a registry and feed.
///
/// Used by the scheduler loop and directly by replay and tests.
pub struct TickProcessor {
    registry: Arc<IndicatorRegistry>,
    feed: Arc<dyn SampleFeed>,
    stats: Arc<SchedulerStats>,
    writer_tx: mpsc::Sender<WriterMessage>,
    config: WriterConfig,
    batch: WriteBatch,
}

impl TickProcessor {
    pub fn new(
        registry: Arc<IndicatorRegistry>,
        feed: Arc<dyn SampleFeed>,
        stats: Arc<SchedulerStats>,
        writer_tx: mpsc::Sender<WriterMessage>,
        config: WriterConfig,
    ) -> Self {
        Self {
            registry,
            feed,
            stats,
            writer_tx,
            config,
            batch: WriteBatch::default(),
        }
    }

    /// Rows computed but not yet handed to the writer.
    pub fn pending_rows(&self) -> usize {
        self.batch.rows.len()
    }

    /// Execute one tick. Only registry corruption or a dead writer is fatal.
    pub fn run_tick(&mut self) -> Result<TickReport, EngineError> {
        let started = Instant::now();
        let snapshot = self.registry.snapshot()?;
        let tick = self.stats.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let mut report = TickReport {
            tick,
            ..Default::default()
        };
        // One pull per symbol per tick, shared by all of its instances.
        let mut samples: HashMap<&str, Option<Sample>> = HashMap::new();

        for instance in &snapshot.instances {
            if instance.is_retired() {
                continue;
            }
            report.instances += 1;

            let symbol = instance.spec().symbol.as_str();
            let sample = match samples.entry(symbol) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let pulled = match self.feed.latest_sample(symbol) {
                        Ok(sample) => sample,
                        Err(err) => {
                            SchedulerStats::add(&self.stats.feed_errors, 1);
                            warn!(symbol = %symbol, error = %err, "Feed unavailable for symbol this tick");
                            None
                        }
                    };
                    e.insert(pulled)
                }
            };
            let Some(sample) = sample.as_ref() else {
                continue;
            };

            match instance.update(sample) {
                Ok(output) => {
                    report.updates += 1;
                    // Deregistered mid-tick: drop the output.
                    if let (Some(value), false) = (output, instance.is_retired()) {
                        self.batch
                            .push(IndicatorValue::new(instance.spec(), value, sample.timestamp));
                        report.values += 1;
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    // Repeated failures of the same instance log at debug.
                    if instance.error_count() == 1 {
                        warn!(
                            instance = %instance.id(),
                            spec = %instance.spec(),
                            error = %err,
                            "Indicator update failed; skipping for this tick"
                        );
                    } else {
                        debug!(instance = %instance.id(), error = %err, "Indicator update failed");
                    }
                }
            }
        }

        SchedulerStats::add(&self.stats.updates, report.updates as u64);
        SchedulerStats::add(&self.stats.values_emitted, report.values as u64);
        SchedulerStats::add(&self.stats.update_errors, report.errors as u64);

        if self.batch.should_flush(&self.config) {
            report.handed_off = self.hand_off()?;
        }

        let elapsed = started.elapsed();
        self.stats
            .last_tick_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
        debug!(
            tick = report.tick,
            instances = report.instances,
            updates = report.updates,
            values = report.values,
            errors = report.errors,
            handed_off = report.handed_off,
            "Tick complete"
        );
        Ok(report)
    }

    /// Give the current batch to the writer without waiting. If the channel
    /// is full the rows stay here for the next tick.
    fn hand_off(&mut self) -> Result<usize, EngineError> {
        let rows = std::mem::take(&mut self.batch.rows);
        let count = rows.len();

        match self.writer_tx.try_send(WriterMessage::Batch(rows)) {
            Ok(()) => {
                self.batch.opened_at = None;
                Ok(count)
            }
            Err(TrySendError::Full(WriterMessage::Batch(rows))) => {
                debug!(rows = count, "Writer busy; keeping batch for next tick");
                self.batch.rows = rows;
                self.enforce_ceiling();
                Ok(0)
            }
            Err(TrySendError::Full(_)) => Ok(0),
            Err(TrySendError::Closed(_)) => Err(EngineError::WriterClosed),
        }
    }

    fn enforce_ceiling(&mut self) {
        let overflow = self
            .batch
            .rows
            .len()
            .saturating_sub(self.config.max_pending_rows);
        if overflow > 0 {
            self.batch.rows.drain(..overflow);
            SchedulerStats::add(&self.stats.rows_dropped, overflow as u64);
            warn!(
                dropped = overflow,
                ceiling = self.config.max_pending_rows,
                "Tick batch exceeded ceiling while writer was busy; dropped oldest"
            );
        }
    }

    /// Hand every remaining row to the writer, waiting for channel space.
    pub async fn finish(&mut self) -> Result<usize, EngineError> {
        if self.batch.rows.is_empty() {
            return Ok(0);
        }
        let rows = std::mem::take(&mut self.batch.rows);
        let count = rows.len();
        self.batch.opened_at = None;
        self.writer_tx
            .send(WriterMessage::Batch(rows))
            .await
            .map_err(|_| EngineError::WriterClosed)?;
        Ok(count)
    }
}

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    tick_task: JoinHandle<Result<(), EngineError>>,
    writer: WriterHandle,
}

/// Drives all registered indicators once per tick.
pub struct Scheduler {
    config: SchedulerConfig,
    writer_config: WriterConfig,
    registry: Arc<IndicatorRegistry>,
    feed: Arc<dyn SampleFeed>,
    store: Arc<dyn TimeSeriesStore>,
    stats: Arc<SchedulerStats>,
    state: Arc<watch::Sender<SchedulerState>>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        writer_config: WriterConfig,
        registry: Arc<IndicatorRegistry>,
        feed: Arc<dyn SampleFeed>,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            config,
            writer_config,
            registry,
            feed,
            store,
            stats: Arc::new(SchedulerStats::new()),
            state: Arc::new(state),
            tasks: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions (e.g. to notice a fatal stop).
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &Arc<IndicatorRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Start the tick loop and writer worker. A no-op while already running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut tasks = self.tasks.lock().await;

        if let Some(running) = tasks.as_ref() {
            if !running.tick_task.is_finished() {
                debug!(state = ?self.state(), "Scheduler already started");
                return Ok(());
            }
            // The loop died on a fatal error; tear it down before restarting.
            if let Some(dead) = tasks.take() {
                if let Err(e) = Self::teardown(dead).await {
                    warn!(error = %e, "Previous scheduler run ended with error");
                }
            }
        }

        self.state.send_replace(SchedulerState::Starting);

        let writer = spawn_writer(
            Arc::clone(&self.store),
            &self.writer_config,
            Arc::clone(&self.stats),
        );
        let processor = TickProcessor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.feed),
            Arc::clone(&self.stats),
            writer.sender(),
            self.writer_config.clone(),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tick_task = tokio::spawn(run_loop(
            processor,
            self.config.tick_interval(),
            shutdown_rx,
            Arc::clone(&self.state),
        ));

        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            instances = self.registry.len(),
            "Scheduler starting"
        );
        *tasks = Some(RunningTasks {
            shutdown,
            tick_task,
            writer,
        });
        Ok(())
    }

    /// Stop after the in-flight tick, flush pending rows, and return to
    /// `Stopped`. A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut tasks = self.tasks.lock().await;
        let Some(running) = tasks.take() else {
            debug!("Scheduler already stopped");
            return Ok(());
        };

        self.state.send_replace(SchedulerState::Stopping);
        let result = Self::teardown(running).await;
        self.state.send_replace(SchedulerState::Stopped);

        let stats = self.stats.snapshot();
        info!(
            ticks = stats.ticks,
            updates = stats.updates,
            rows_written = stats.rows_written,
            update_errors = stats.update_errors,
            "Scheduler stopped"
        );
        result
    }

    async fn teardown(running: RunningTasks) -> Result<(), EngineError> {
        let _ = running.shutdown.send(true);
        let loop_result = match running.tick_task.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Join(e.to_string())),
        };
        let flush_result = running.writer.shutdown().await;
        loop_result?;
        flush_result.map(|_| ())
    }
}

async fn run_loop(
    mut processor: TickProcessor,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<SchedulerState>>,
) -> Result<(), EngineError> {
    // Deadlines are origin + k * period regardless of how long ticks take.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    state.send_replace(SchedulerState::Running);
    info!("Scheduler running");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let started = Instant::now();
                if let Err(e) = processor.run_tick() {
                    error!(error = %e, "Fatal error in tick loop; halting scheduler");
                    let _ = processor.finish().await;
                    state.send_replace(SchedulerState::Stopped);
                    return Err(e);
                }
                let elapsed = started.elapsed();
                if elapsed > period {
                    warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        period_ms = period.as_millis() as u64,
                        "Tick overran its interval"
                    );
                }
            }
        }
    }

    processor.finish().await?;
    Ok(())
}
