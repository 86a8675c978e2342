//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "tests"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Scenario tests for reconciliation and snapshot extraction."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use chrono::{Duration, FixedOffset, TimeZone};
use cw_common::config::{AlertConfig, ContinuityConfig, GeneratorConfig, ZoneConfig};
use cw_common::record::{Record, Timestamp};
use cw_common::Condition;
use cw_core::{load_or_empty, Classification, ContinuityEngine, SnapshotExtractor};
use cw_persistence::{MemoryStore, SeriesStore};
use cw_sim::SyntheticRecordGenerator;
use indexmap::IndexMap;

fn now() -> Timestamp {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 10, 5, 14, 30, 0)
        .unwrap()
}

fn two_zone_engine(retention: u32, max_backfill: u32) -> ContinuityEngine {
    let mut zones = IndexMap::new();
    zones.insert("A".to_owned(), ZoneConfig::new(45.0));
    zones.insert("B".to_owned(), ZoneConfig::new(45.0));
    let generator = SyntheticRecordGenerator::new(&zones, &GeneratorConfig::default())
        .unwrap()
        .with_seed(2024);
    ContinuityEngine::new(
        generator,
        &ContinuityConfig {
            retention_minutes: retention,
            max_backfill_minutes: max_backfill,
            staleness_minutes: 60,
        },
    )
}

fn assert_complete_grid(series: &[Record], from_exclusive: Timestamp, to: Timestamp) {
    let minutes = (to - from_exclusive).num_minutes();
    assert_eq!(series.len() as i64, minutes * 2, "record count");
    for (index, pair) in series.chunks(2).enumerate() {
        let expected = from_exclusive + Duration::minutes(index as i64 + 1);
        assert_eq!(pair[0].timestamp, expected);
        assert_eq!(pair[1].timestamp, expected);
        assert_eq!(pair[0].zone, "A");
        assert_eq!(pair[1].zone, "B");
    }
}

#[test]
fn empty_history_fills_the_retention_window() {
    let engine = two_zone_engine(60, 1440);
    let result = engine.reconcile(Vec::new(), now());

    assert_eq!(result.series.len(), 120);
    assert_complete_grid(&result.series, now() - Duration::minutes(60), now());
    assert_eq!(result.report.generated_records, 120);
    assert!(result.report.conditions.is_empty());

    let snapshot = SnapshotExtractor::new(AlertConfig::default()).latest(&result.series);
    assert_eq!(snapshot.timestamp, Some(now()));
    assert_eq!(snapshot.records.len(), 2);
    let expected_total: f64 = result.series[118..].iter().map(|r| r.load_kw).sum();
    assert_eq!(snapshot.aggregate.total_load_kw, expected_total);
    // Two off-peak 45 kW zones cannot reach 180 kW without a >18 sigma draw.
    assert_eq!(snapshot.classification, Classification::Normal);
}

#[test]
fn reconciliation_is_idempotent_for_a_fixed_minute() {
    let engine = two_zone_engine(60, 1440);
    let history: Vec<Record> = (20..40)
        .flat_map(|ago| {
            let ts = now() - Duration::minutes(ago);
            [
                Record::observed(ts, "A", 40.0, 1),
                Record::observed(ts, "B", 41.0, 1),
            ]
        })
        .collect();
    let first = engine.reconcile(history, now());
    let second = engine.reconcile(first.series.clone(), now());
    assert_eq!(second.series, first.series);
    assert_eq!(second.report.generated_records, 0);
    assert_eq!(second.report.trimmed_records, 0);
}

#[test]
fn advancing_the_clock_trims_and_extends() {
    let engine = two_zone_engine(30, 1440);
    let first = engine.reconcile(Vec::new(), now());
    let later = now() + Duration::minutes(7);
    let second = engine.reconcile(first.series.clone(), later);

    assert_complete_grid(&second.series, later - Duration::minutes(30), later);
    assert_eq!(second.report.gap_minutes, 7);
    assert_eq!(second.report.trimmed_records, 14);
    // Overlapping minutes are carried over, not regenerated.
    assert_eq!(second.series[..46], first.series[14..]);
}

#[test]
fn window_bound_holds_for_long_history() {
    let engine = two_zone_engine(15, 1440);
    let history: Vec<Record> = (0..200)
        .flat_map(|ago| {
            let ts = now() - Duration::minutes(ago);
            [Record::observed(ts, "A", 1.0, 0), Record::observed(ts, "B", 1.0, 0)]
        })
        .collect();
    let result = engine.reconcile(history, now());
    let cutoff = now() - Duration::minutes(15);
    assert!(result.series.iter().all(|r| r.timestamp > cutoff));
    assert_eq!(result.series.len(), 30);
    assert_eq!(result.report.generated_records, 0);
}

#[test]
fn generation_never_exceeds_the_ceiling() {
    let engine = two_zone_engine(600, 45);
    let ancient = now() - Duration::days(30);
    let history = vec![
        Record::observed(ancient, "A", 1.0, 0),
        Record::observed(ancient, "B", 1.0, 0),
    ];
    let result = engine.reconcile(history, now());
    assert!(result.report.generated_minutes() <= 45);
    assert_eq!(result.report.generated_records, 90);
    assert_complete_grid(&result.series, now() - Duration::minutes(45), now());
    assert!(result.report.has(Condition::GenerationOverflow));
}

#[test]
fn failing_store_still_yields_a_full_window() {
    let store = MemoryStore::new(vec![Record::observed(now(), "A", 1.0, 0)]);
    store.set_failing(true);
    let history = load_or_empty(&store);
    assert!(history.records.is_empty());
    assert_eq!(history.conditions, vec![Condition::StoreUnavailable]);

    let engine = two_zone_engine(60, 1440);
    let result = engine.reconcile(history.records, now());
    assert_complete_grid(&result.series, now() - Duration::minutes(60), now());
    assert!(store.records().len() == 1, "failed loads never write");
    assert!(store.load().is_err());
}

#[test]
fn snapshot_returns_only_the_newest_minute() {
    let t1 = now() - Duration::minutes(1);
    let series = vec![
        Record::observed(t1, "A", 90.0, 6),
        Record::observed(t1, "B", 95.0, 6),
        Record::observed(now(), "A", 30.0, 1),
        Record::observed(now(), "B", 35.0, 2),
    ];
    let snapshot = SnapshotExtractor::new(AlertConfig::default()).latest(&series);
    assert_eq!(snapshot.records.len(), 2);
    assert!(snapshot.records.iter().all(|r| r.timestamp == now()));
    assert_eq!(snapshot.aggregate.total_load_kw, 65.0);
    assert_eq!(snapshot.classification, Classification::Normal);
}
