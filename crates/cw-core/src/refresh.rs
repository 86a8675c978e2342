//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Periodic load, reconcile, snapshot, and render cycle."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use cw_common::config::AppConfig;
use cw_common::record::{truncate_to_minute, Series, Timestamp};
use cw_common::time::TimeSource;
use cw_common::Condition;
use cw_persistence::SeriesStore;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::continuity::{ContinuityEngine, ReconcileReport};
use crate::metrics::ContinuityMetrics;
use crate::presentation::PresentationAdapter;
use crate::snapshot::{AlertDebouncer, Classification, Snapshot, SnapshotExtractor};

/// History as seen by one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub records: Series,
    pub dropped_rows: usize,
    pub conditions: Vec<Condition>,
}

/// Load history, degrading any store failure to an empty series.
pub fn load_or_empty(store: &dyn SeriesStore) -> History {
    match store.load() {
        Ok(loaded) => {
            let mut conditions = Vec::new();
            if !loaded.dropped.is_empty() {
                conditions.push(Condition::MalformedRecord);
            }
            History {
                records: loaded.records,
                dropped_rows: loaded.dropped.len(),
                conditions,
            }
        }
        Err(err) => {
            warn!(
                store = %store.describe(),
                condition = %err.condition(),
                kind = err.kind(),
                error = %err,
                "history unavailable; continuing with an empty series"
            );
            History {
                conditions: vec![err.condition()],
                ..History::default()
            }
        }
    }
}

/// Result of a single refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub now: Timestamp,
    pub series: Series,
    pub snapshot: Snapshot,
    /// Classification after debouncing; this is what was rendered.
    pub published: Classification,
    pub report: ReconcileReport,
    pub dropped_rows: usize,
    /// Whether generated records were written back to the store.
    pub persisted: bool,
}

impl CycleOutcome {
    pub fn degraded(&self) -> bool {
        !self.report.conditions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub cycles: u64,
    pub generated_records: u64,
    /// Cycles whose published classification was alert.
    pub alerts: u64,
    pub degraded_cycles: u64,
    pub last_classification: Option<Classification>,
}

/// Drives load, reconcile, snapshot and render on a fixed interval.
pub struct RefreshLoop {
    engine: ContinuityEngine,
    extractor: SnapshotExtractor,
    debouncer: AlertDebouncer,
    store: Arc<dyn SeriesStore>,
    clock: Arc<dyn TimeSource>,
    renderer: Box<dyn PresentationAdapter>,
    interval: Duration,
    max_cycles: Option<u64>,
    persist_backfill: bool,
    reseed_each_cycle: bool,
    metrics: Option<ContinuityMetrics>,
    stats: RefreshStats,
}

impl RefreshLoop {
    pub fn new(
        engine: ContinuityEngine,
        extractor: SnapshotExtractor,
        store: Arc<dyn SeriesStore>,
        clock: Arc<dyn TimeSource>,
        renderer: Box<dyn PresentationAdapter>,
    ) -> Self {
        Self {
            engine,
            extractor,
            debouncer: AlertDebouncer::new(0),
            store,
            clock,
            renderer,
            interval: Duration::from_secs(10),
            max_cycles: None,
            persist_backfill: false,
            reseed_each_cycle: false,
            metrics: None,
            stats: RefreshStats::default(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn SeriesStore>,
        clock: Arc<dyn TimeSource>,
        renderer: Box<dyn PresentationAdapter>,
    ) -> Result<Self> {
        let engine = ContinuityEngine::from_config(config)?;
        let extractor = SnapshotExtractor::new(config.alert.clone());
        Ok(Self::new(engine, extractor, store, clock, renderer)
            .with_debounce(config.alert.debounce_cycles)
            .with_interval(config.refresh.interval)
            .with_max_cycles(config.refresh.max_cycles)
            .with_persist_backfill(config.store.persist_backfill)
            .with_reseed_each_cycle(config.generator.random_seed.is_none()))
    }

    pub fn with_debounce(mut self, cycles: u32) -> Self {
        self.debouncer = AlertDebouncer::new(cycles);
        self
    }

    /// Zero intervals are raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn with_persist_backfill(mut self, persist: bool) -> Self {
        self.persist_backfill = persist;
        self
    }

    /// Draw a fresh generator seed before each cycle.
    pub fn with_reseed_each_cycle(mut self, reseed: bool) -> Self {
        self.reseed_each_cycle = reseed;
        self
    }

    pub fn with_metrics(mut self, metrics: ContinuityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let now = truncate_to_minute(self.clock.now());
        if self.reseed_each_cycle {
            self.engine.reseed(rand::random());
        }

        let history = load_or_empty(self.store.as_ref());
        let reconciliation = self.engine.reconcile(history.records, now);
        let mut report = reconciliation.report;
        let mut conditions = history.conditions;
        conditions.append(&mut report.conditions);
        report.conditions = conditions;

        let mut persisted = false;
        if self.persist_backfill && !reconciliation.generated.is_empty() {
            match self.store.save(&reconciliation.generated) {
                Ok(rows) => {
                    debug!(store = %self.store.describe(), rows, "backfill persisted");
                    persisted = true;
                }
                Err(err) => {
                    warn!(
                        store = %self.store.describe(),
                        condition = %err.condition(),
                        kind = err.kind(),
                        error = %err,
                        "failed to persist backfill"
                    );
                    if !report.has(err.condition()) {
                        report.conditions.push(err.condition());
                    }
                }
            }
        }

        let series = reconciliation.series;
        let snapshot = self.extractor.latest(&series);
        let published = self.debouncer.observe(snapshot.classification);
        self.renderer.render(&series, &snapshot, published);

        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(
                &report,
                history.dropped_rows,
                series.len(),
                &snapshot,
                published,
                started.elapsed().as_secs_f64(),
            );
        }

        self.stats.cycles += 1;
        self.stats.generated_records += report.generated_records as u64;
        if published.is_alert() {
            self.stats.alerts += 1;
        }
        if !report.conditions.is_empty() {
            self.stats.degraded_cycles += 1;
        }
        self.stats.last_classification = Some(published);

        CycleOutcome {
            now,
            series,
            snapshot,
            published,
            report,
            dropped_rows: history.dropped_rows,
            persisted,
        }
    }

    /// Run cycles until `max_cycles` is reached or `shutdown` fires.
    ///
    /// The first cycle starts immediately. Shutdown is observed between cycles,
    /// never in the middle of one. A closed shutdown channel also stops the loop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> RefreshStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            store = %self.store.describe(),
            interval_ms = self.interval.as_millis() as u64,
            max_cycles = ?self.max_cycles,
            "refresh loop started"
        );
        loop {
            if self.max_cycles.is_some_and(|max| self.stats.cycles >= max) {
                debug!(cycles = self.stats.cycles, "refresh loop reached cycle limit");
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("refresh loop shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle();
                }
            }
        }
        info!(
            cycles = self.stats.cycles,
            generated = self.stats.generated_records,
            degraded = self.stats.degraded_cycles,
            "refresh loop stopped"
        );
        self.stats
    }

    pub fn spawn(self) -> RefreshHandle {
        let (shutdown, receiver) = broadcast::channel(4);
        let task = tokio::spawn(self.run(receiver));
        RefreshHandle { shutdown, task }
    }
}

/// Lifecycle handle for a spawned [`RefreshLoop`].
#[derive(Debug)]
pub struct RefreshHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<RefreshStats>,
}

impl RefreshHandle {
    /// Sender that stops the loop when signalled, for wiring into signal handlers.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    pub async fn shutdown(self) -> Result<RefreshStats> {
        let _ = self.shutdown.send(());
        self.join().await
    }

    /// Wait for the loop to finish on its own.
    pub async fn join(self) -> Result<RefreshStats> {
        self.task
            .await
            .map_err(|err| anyhow!("refresh task join failure: {}", err))
    }
}
