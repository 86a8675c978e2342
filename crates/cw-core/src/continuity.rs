//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Gap bounding, synthetic backfill, merge, and retention trimming."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Duration;
use cw_common::config::{AppConfig, ContinuityConfig};
use cw_common::record::{truncate_to_minute, Record, Series, Timestamp};
use cw_common::time::whole_minutes_between;
use cw_common::Condition;
use cw_sim::SyntheticRecordGenerator;
use serde::Serialize;
use tracing::{debug, warn};

/// Working view keyed by minute, then by zone position in the configured set.
type Grid = BTreeMap<Timestamp, BTreeMap<usize, Record>>;

fn grid_len(grid: &Grid) -> usize {
    grid.values().map(BTreeMap::len).sum()
}

/// What a reconciliation absorbed and produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Newest retained record before backfill.
    pub last_known: Option<Timestamp>,
    /// Trailing gap before the backfill ceiling was applied.
    pub requested_gap_minutes: i64,
    /// Trailing minutes actually generated.
    pub gap_minutes: i64,
    /// Minutes inside the retained history that needed missing zones filled.
    pub repaired_minutes: i64,
    pub generated_records: usize,
    /// Records dropped because they fell out of the retention window.
    pub trimmed_records: usize,
    /// Records dropped as stale, unrepairable, or outside the zone set.
    pub discarded_records: usize,
    pub stale_history: bool,
    pub conditions: Vec<Condition>,
}

impl ReconcileReport {
    /// Minutes that received synthetic records, trailing and repaired.
    pub fn generated_minutes(&self) -> i64 {
        self.gap_minutes + self.repaired_minutes
    }

    pub fn has(&self, condition: Condition) -> bool {
        self.conditions.contains(&condition)
    }
}

/// Output of [`ContinuityEngine::reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Contiguous grid ordered by timestamp, then configured zone order.
    pub series: Series,
    /// Records synthesised during this call, in generation order.
    pub generated: Vec<Record>,
    pub report: ReconcileReport,
}

/// Reconciles stored history with the current minute.
///
/// `reconcile` is total: any input series and any `now` yield a usable,
/// internally consistent series. Stale history is discarded instead of being
/// extended, the generated span never exceeds `max_backfill_minutes`, and a clock
/// that is behind the newest record only trims.
#[derive(Debug, Clone)]
pub struct ContinuityEngine {
    generator: SyntheticRecordGenerator,
    retention: Duration,
    staleness: Duration,
    max_backfill_minutes: i64,
}

impl ContinuityEngine {
    pub fn new(generator: SyntheticRecordGenerator, config: &ContinuityConfig) -> Self {
        Self {
            generator,
            retention: config.retention(),
            staleness: config.staleness(),
            max_backfill_minutes: i64::from(config.max_backfill_minutes),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let generator = SyntheticRecordGenerator::new(&config.zones, &config.generator)
            .context("invalid generator configuration")?;
        Ok(Self::new(generator, &config.continuity))
    }

    pub fn generator(&self) -> &SyntheticRecordGenerator {
        &self.generator
    }

    pub fn reseed(&mut self, seed: u64) {
        self.generator.reseed(seed);
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn reconcile(&self, existing: Series, now: Timestamp) -> Reconciliation {
        let now = truncate_to_minute(now);
        let cutoff = now - self.retention;
        let one_minute = Duration::minutes(1);
        let zones: Vec<&str> = self.generator.zones().collect();
        let mut report = ReconcileReport::default();

        let mut grid = Grid::new();
        for mut record in existing {
            let Some(position) = self.generator.zone_index(&record.zone) else {
                report.discarded_records += 1;
                continue;
            };
            record.timestamp = truncate_to_minute(record.timestamp.with_timezone(now.offset()));
            if record.timestamp <= cutoff {
                report.trimmed_records += 1;
                continue;
            }
            grid.entry(record.timestamp)
                .or_default()
                .insert(position, record);
        }

        let last_known = grid.keys().next_back().copied();
        report.last_known = last_known;
        let mut regression = false;
        let mut anchor = match last_known {
            None => cutoff,
            Some(newest) if newest > now => {
                regression = true;
                report.conditions.push(Condition::ClockRegression);
                warn!(
                    condition = %Condition::ClockRegression,
                    last_known = %newest,
                    now = %now,
                    "clock is behind the newest record; skipping backfill"
                );
                newest
            }
            Some(newest) if newest < now - self.staleness => {
                report.stale_history = true;
                report.discarded_records += grid_len(&grid);
                grid.clear();
                debug!(last_known = %newest, now = %now, "history is stale; rebuilding the window");
                cutoff
            }
            Some(newest) => newest,
        };

        let requested = whole_minutes_between(anchor, now).max(0);
        report.requested_gap_minutes = requested;
        let mut gap = requested;
        if requested > self.max_backfill_minutes {
            gap = self.max_backfill_minutes;
            anchor = now - Duration::minutes(gap);
            // Older history would leave a hole before the anchored span.
            let kept = grid.split_off(&(anchor + one_minute));
            report.discarded_records += grid_len(&grid);
            grid = kept;
            report.conditions.push(Condition::GenerationOverflow);
            warn!(
                condition = %Condition::GenerationOverflow,
                requested_minutes = requested,
                ceiling_minutes = gap,
                "backfill gap clamped to ceiling"
            );
        }
        report.gap_minutes = gap;

        let mut generated = Vec::new();
        for offset in 1..=gap {
            let timestamp = anchor + Duration::minutes(offset);
            let slot = grid.entry(timestamp).or_default();
            for (position, zone) in zones.iter().enumerate() {
                let record = self.generator.generate(timestamp, zone);
                generated.push(record.clone());
                slot.insert(position, record);
            }
        }

        if !regression {
            let mut budget = self.max_backfill_minutes - gap;
            if let Some(&oldest) = grid.keys().next() {
                let mut minute = anchor;
                while minute >= oldest {
                    let missing: Vec<usize> = (0..zones.len())
                        .filter(|position| {
                            !grid
                                .get(&minute)
                                .is_some_and(|slot| slot.contains_key(position))
                        })
                        .collect();
                    if !missing.is_empty() {
                        if budget == 0 {
                            let kept = grid.split_off(&(minute + one_minute));
                            report.discarded_records += grid_len(&grid);
                            grid = kept;
                            debug!(cut_at = %minute, "repair budget exhausted; dropping older history");
                            break;
                        }
                        let slot = grid.entry(minute).or_default();
                        for position in missing {
                            let record = self.generator.generate(minute, zones[position]);
                            generated.push(record.clone());
                            slot.insert(position, record);
                        }
                        budget -= 1;
                        report.repaired_minutes += 1;
                    }
                    minute = minute - one_minute;
                }
            }
        }

        report.generated_records = generated.len();
        let series: Series = grid
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect();
        debug!(
            now = %now,
            records = series.len(),
            gap_minutes = report.gap_minutes,
            repaired_minutes = report.repaired_minutes,
            generated = report.generated_records,
            trimmed = report.trimmed_records,
            discarded = report.discarded_records,
            "series reconciled"
        );
        Reconciliation {
            series,
            generated,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use cw_common::config::{GeneratorConfig, ZoneConfig};
    use indexmap::IndexMap;

    fn now() -> Timestamp {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 9, 1, 12, 0, 0)
            .unwrap()
    }

    fn engine(retention: u32, max_backfill: u32, staleness: u32) -> ContinuityEngine {
        let mut zones = IndexMap::new();
        zones.insert("A".to_owned(), ZoneConfig::new(45.0));
        zones.insert("B".to_owned(), ZoneConfig::new(65.0));
        let generator = SyntheticRecordGenerator::new(&zones, &GeneratorConfig::default())
            .unwrap()
            .with_seed(11);
        ContinuityEngine::new(
            generator,
            &ContinuityConfig {
                retention_minutes: retention,
                max_backfill_minutes: max_backfill,
                staleness_minutes: staleness,
            },
        )
    }

    fn observed(minutes_ago: i64, zone: &str) -> Record {
        Record::observed(now() - Duration::minutes(minutes_ago), zone, 50.0, 1)
    }

    fn full_minute(minutes_ago: i64) -> Vec<Record> {
        vec![observed(minutes_ago, "A"), observed(minutes_ago, "B")]
    }

    #[test]
    fn seconds_in_now_are_truncated() {
        let engine = engine(10, 100, 5);
        let result = engine.reconcile(Vec::new(), now() + Duration::seconds(42));
        assert_eq!(result.series.last().unwrap().timestamp, now());
        assert_eq!(result.series.len(), 20);
    }

    #[test]
    fn extends_fresh_history_from_last_known() {
        let engine = engine(60, 1440, 30);
        let history: Vec<Record> = (3..=10).rev().flat_map(full_minute).collect();
        let result = engine.reconcile(history, now());
        assert_eq!(result.report.last_known, Some(now() - Duration::minutes(3)));
        assert_eq!(result.report.gap_minutes, 3);
        assert_eq!(result.report.generated_records, 6);
        assert_eq!(result.series.len(), 8 * 2 + 6);
        assert!(result.series[..16].iter().all(|r| !r.synthetic));
        assert!(result.series[16..].iter().all(|r| r.synthetic));
    }

    #[test]
    fn stale_history_is_replaced_by_full_window() {
        let engine = engine(60, 1440, 30);
        let history: Vec<Record> = (45..=50).flat_map(full_minute).collect();
        let result = engine.reconcile(history, now());
        assert!(result.report.stale_history);
        assert_eq!(result.report.discarded_records, 12);
        assert_eq!(result.report.gap_minutes, 60);
        assert!(result.series.iter().all(|r| r.synthetic));
        assert_eq!(result.series.len(), 120);
    }

    #[test]
    fn zero_gap_only_trims() {
        let engine = engine(5, 100, 5);
        let history: Vec<Record> = (0..=8).rev().flat_map(full_minute).collect();
        let result = engine.reconcile(history, now());
        assert_eq!(result.report.gap_minutes, 0);
        assert_eq!(result.report.generated_records, 0);
        assert_eq!(result.report.trimmed_records, 8);
        assert_eq!(result.series.len(), 10);
    }

    #[test]
    fn clock_regression_never_generates() {
        let engine = engine(60, 100, 30);
        let mut history: Vec<Record> = (0..5).flat_map(full_minute).collect();
        history.push(Record::observed(now() + Duration::minutes(3), "A", 1.0, 0));
        history.retain(|r| !(r.zone == "B" && r.timestamp == now() - Duration::minutes(2)));
        let before = history.len();
        let result = engine.reconcile(history, now());
        assert!(result.report.has(Condition::ClockRegression));
        assert_eq!(result.report.gap_minutes, 0);
        assert_eq!(result.report.generated_records, 0);
        assert_eq!(result.series.len(), before);
    }

    #[test]
    fn overflow_anchors_generation_at_now() {
        let engine = engine(120, 30, 200);
        let result = engine.reconcile(Vec::new(), now());
        assert!(result.report.has(Condition::GenerationOverflow));
        assert_eq!(result.report.requested_gap_minutes, 120);
        assert_eq!(result.report.gap_minutes, 30);
        assert_eq!(result.series.len(), 60);
        assert_eq!(
            result.series.first().unwrap().timestamp,
            now() - Duration::minutes(29)
        );
        assert_eq!(result.series.last().unwrap().timestamp, now());
    }

    #[test]
    fn interior_holes_are_repaired() {
        let engine = engine(60, 100, 30);
        let mut history: Vec<Record> = (0..=6).rev().flat_map(full_minute).collect();
        history.retain(|r| {
            let age = (now() - r.timestamp).num_minutes();
            !(age == 4 || (age == 2 && r.zone == "A"))
        });
        let result = engine.reconcile(history, now());
        assert_eq!(result.report.gap_minutes, 0);
        assert_eq!(result.report.repaired_minutes, 2);
        assert_eq!(result.report.generated_records, 3);
        assert_eq!(result.series.len(), 14);
    }

    #[test]
    fn exhausted_repair_budget_cuts_older_history() {
        let engine = engine(60, 3, 30);
        let mut history: Vec<Record> = (2..=10).rev().flat_map(full_minute).collect();
        history.retain(|r| {
            let age = (now() - r.timestamp).num_minutes();
            age != 6 && age != 8
        });
        let result = engine.reconcile(history, now());
        assert_eq!(result.report.gap_minutes, 2);
        assert_eq!(result.report.repaired_minutes, 1);
        assert_eq!(
            result.series.first().unwrap().timestamp,
            now() - Duration::minutes(7)
        );
        assert_eq!(result.report.discarded_records, 4);
        assert_eq!(result.series.len(), 8 * 2);
    }

    #[test]
    fn records_outside_the_zone_set_are_discarded() {
        let engine = engine(10, 100, 5);
        let mut history = full_minute(0);
        history.push(observed(0, "Elsewhere"));
        let result = engine.reconcile(history, now());
        assert_eq!(result.report.discarded_records, 1);
        assert_eq!(result.series.len(), 2);
    }

    #[test]
    fn foreign_offsets_are_normalised() {
        let engine = engine(10, 100, 5);
        let utc = FixedOffset::east_opt(0).unwrap();
        let history: Vec<Record> = full_minute(1)
            .into_iter()
            .map(|mut r| {
                r.timestamp = r.timestamp.with_timezone(&utc);
                r
            })
            .collect();
        let result = engine.reconcile(history, now());
        assert_eq!(result.report.gap_minutes, 1);
        assert!(result
            .series
            .iter()
            .all(|r| r.timestamp.offset() == now().offset()));
    }
}
