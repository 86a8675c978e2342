//! ---
//! cw_section: "03-persistence-logging"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Prometheus metrics for refresh cycles and reconciliation."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use cw_common::Condition;
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::continuity::ReconcileReport;
use crate::snapshot::{Classification, Snapshot};

/// Shared registry type used by the daemon and the refresh loop.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode every family in `registry` using the text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

#[derive(Clone, Debug)]
pub struct ContinuityMetrics {
    registry: SharedRegistry,
    cycles_total: IntCounter,
    generated_records_total: IntCounter,
    generated_minutes_total: IntCounter,
    dropped_rows_total: IntCounter,
    conditions_total: IntCounterVec,
    series_records: IntGauge,
    total_load_kw: Gauge,
    alert_active: IntGauge,
    cycle_seconds: Histogram,
}

impl ContinuityMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "cw_refresh_cycles_total",
            "Refresh cycles completed",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let generated_records_total = IntCounter::with_opts(Opts::new(
            "cw_generated_records_total",
            "Synthetic records produced by backfill and repair",
        ))?;
        registry.register(Box::new(generated_records_total.clone()))?;

        let generated_minutes_total = IntCounter::with_opts(Opts::new(
            "cw_generated_minutes_total",
            "Minutes that received synthetic records",
        ))?;
        registry.register(Box::new(generated_minutes_total.clone()))?;

        let dropped_rows_total = IntCounter::with_opts(Opts::new(
            "cw_dropped_rows_total",
            "Stored rows dropped while loading history",
        ))?;
        registry.register(Box::new(dropped_rows_total.clone()))?;

        let conditions_total = IntCounterVec::new(
            Opts::new(
                "cw_conditions_total",
                "Degraded conditions absorbed by the refresh cycle",
            ),
            &["condition"],
        )?;
        registry.register(Box::new(conditions_total.clone()))?;
        for condition in Condition::ALL {
            conditions_total.with_label_values(&[condition.as_str()]);
        }

        let series_records = IntGauge::with_opts(Opts::new(
            "cw_series_records",
            "Records in the reconciled series",
        ))?;
        registry.register(Box::new(series_records.clone()))?;

        let total_load_kw = Gauge::with_opts(Opts::new(
            "cw_snapshot_total_load_kw",
            "Network load of the latest snapshot",
        ))?;
        registry.register(Box::new(total_load_kw.clone()))?;

        let alert_active = IntGauge::with_opts(Opts::new(
            "cw_alert_active",
            "1 while the published classification is alert",
        ))?;
        registry.register(Box::new(alert_active.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let cycle_seconds = Histogram::with_opts(
            HistogramOpts::new("cw_refresh_cycle_seconds", "Wall time of one refresh cycle")
                .buckets(buckets),
        )?;
        registry.register(Box::new(cycle_seconds.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            generated_records_total,
            generated_minutes_total,
            dropped_rows_total,
            conditions_total,
            series_records,
            total_load_kw,
            alert_active,
            cycle_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_condition(&self, condition: Condition) {
        self.conditions_total
            .with_label_values(&[condition.as_str()])
            .inc();
    }

    pub fn record_cycle(
        &self,
        report: &ReconcileReport,
        dropped_rows: usize,
        series_len: usize,
        snapshot: &Snapshot,
        published: Classification,
        seconds: f64,
    ) {
        self.cycles_total.inc();
        self.generated_records_total
            .inc_by(report.generated_records as u64);
        self.generated_minutes_total
            .inc_by(report.generated_minutes().max(0) as u64);
        self.dropped_rows_total.inc_by(dropped_rows as u64);
        for condition in &report.conditions {
            self.record_condition(*condition);
        }
        self.series_records.set(series_len as i64);
        self.total_load_kw.set(snapshot.aggregate.total_load_kw);
        self.alert_active.set(i64::from(published.is_alert()));
        self.cycle_seconds.observe(seconds);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles_total.get()
    }

    pub fn condition_count(&self, condition: Condition) -> u64 {
        self.conditions_total
            .with_label_values(&[condition.as_str()])
            .get()
    }
}
