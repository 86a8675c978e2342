//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Latest-minute snapshot, aggregates, and alert classification."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::fmt;

use cw_common::config::AlertConfig;
use cw_common::record::{Record, Timestamp};
use serde::Serialize;

/// Network-wide operating state derived from one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Normal,
    Alert,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::Alert => "alert",
        }
    }

    pub fn is_alert(self) -> bool {
        matches!(self, Classification::Alert)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals and averages across the zones of one minute.
///
/// Derived-field aggregates are `None` when no record in the snapshot carries the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub zone_count: usize,
    pub total_load_kw: f64,
    pub avg_queue: f64,
    pub wait_time_minutes: i64,
    pub total_carbon_saved_kg: Option<f64>,
    pub available_batteries: Option<u64>,
    pub avg_state_of_health_pct: Option<f64>,
    pub avg_green_energy_pct: Option<f64>,
    pub total_v2g_profit: Option<f64>,
    pub max_fault_risk_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: Option<Timestamp>,
    pub records: Vec<Record>,
    pub aggregate: Aggregate,
    pub classification: Classification,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Extracts the newest minute of a series and classifies it.
#[derive(Debug, Clone)]
pub struct SnapshotExtractor {
    config: AlertConfig,
}

impl SnapshotExtractor {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Snapshot of the records sharing the series' maximum timestamp.
    pub fn latest(&self, series: &[Record]) -> Snapshot {
        let Some(timestamp) = series.iter().map(|record| record.timestamp).max() else {
            return Snapshot::default();
        };
        let records: Vec<Record> = series
            .iter()
            .filter(|record| record.timestamp == timestamp)
            .cloned()
            .collect();
        let aggregate = self.aggregate(&records);
        let classification = self.classify(&aggregate);
        Snapshot {
            timestamp: Some(timestamp),
            records,
            aggregate,
            classification,
        }
    }

    pub fn aggregate(&self, records: &[Record]) -> Aggregate {
        if records.is_empty() {
            return Aggregate::default();
        }
        let count = records.len() as f64;
        let total_load_kw: f64 = records.iter().map(|r| r.load_kw).sum();
        let avg_queue = records.iter().map(|r| f64::from(r.queue_length)).sum::<f64>() / count;
        let wait = avg_queue * self.config.wait_slope + self.config.wait_intercept;

        Aggregate {
            zone_count: records.len(),
            total_load_kw,
            avg_queue,
            wait_time_minutes: wait.round() as i64,
            total_carbon_saved_kg: sum_of(records, |r| r.carbon_saved_kg),
            available_batteries: records
                .iter()
                .filter_map(|r| r.available_batteries.map(u64::from))
                .reduce(|acc, count| acc.saturating_add(count)),
            avg_state_of_health_pct: mean_of(records, |r| r.state_of_health_pct),
            avg_green_energy_pct: mean_of(records, |r| r.green_energy_pct),
            total_v2g_profit: sum_of(records, |r| r.v2g_profit),
            max_fault_risk_pct: records
                .iter()
                .filter_map(|r| r.fault_risk_pct)
                .reduce(f64::max),
        }
    }

    /// Alert when total load or average queue strictly exceeds its threshold.
    pub fn classify(&self, aggregate: &Aggregate) -> Classification {
        if aggregate.zone_count == 0 {
            return Classification::Normal;
        }
        if aggregate.total_load_kw > self.config.load_threshold_kw
            || aggregate.avg_queue > self.config.queue_threshold
        {
            Classification::Alert
        } else {
            Classification::Normal
        }
    }
}

fn sum_of(records: &[Record], field: impl Fn(&Record) -> Option<f64>) -> Option<f64> {
    records.iter().filter_map(field).reduce(|a, b| a + b)
}

fn mean_of(records: &[Record], field: impl Fn(&Record) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = records.iter().filter_map(field).collect();
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Holds a published classification until a change persists.
///
/// A raw classification different from the published one must be observed on
/// `required` consecutive cycles before it is published. With `required == 0`
/// every raw classification is published immediately.
#[derive(Debug, Clone, Default)]
pub struct AlertDebouncer {
    required: u32,
    published: Option<Classification>,
    pending: u32,
}

impl AlertDebouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            published: None,
            pending: 0,
        }
    }

    pub fn published(&self) -> Option<Classification> {
        self.published
    }

    pub fn observe(&mut self, raw: Classification) -> Classification {
        let Some(current) = self.published else {
            self.published = Some(raw);
            return raw;
        };
        if raw == current || self.required == 0 {
            self.pending = 0;
            self.published = Some(raw);
            return raw;
        }
        self.pending += 1;
        if self.pending >= self.required {
            self.pending = 0;
            self.published = Some(raw);
            return raw;
        }
        current
    }
}
