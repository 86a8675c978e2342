//! ---
//! cw_section: "03-persistence-logging"
//! cw_subsection: "tests"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Integration tests for the CSV series store."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::fs;
use std::io::Write;

use anyhow::Result;
use chrono::{Duration, FixedOffset, TimeZone};
use cw_common::record::{Record, Timestamp};
use cw_persistence::{CsvSeriesStore, SeriesStore, StoreError};
use tempfile::tempdir;

fn beijing() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn ts(minute: i64) -> Timestamp {
    beijing().with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
}

#[test]
fn loads_rows_and_defaults_missing_optional_columns() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("history.csv");
    let mut file = fs::File::create(&path)?;
    writeln!(file, "timestamp,zone,load_kw,queue_length")?;
    writeln!(file, "2024-07-01 09:00:00,North,44.5,1")?;
    writeln!(file, "2024-07-01 09:00:00,Cotai,66.1,2")?;
    writeln!(file, "2024-07-01 09:01:00,North,45.0,0")?;
    file.flush()?;

    let loaded = CsvSeriesStore::new(&path, beijing()).load()?;
    assert!(loaded.dropped.is_empty());
    assert_eq!(loaded.records.len(), 3);
    let first = &loaded.records[0];
    assert_eq!(first.timestamp, ts(0));
    assert_eq!(first.zone, "Cotai");
    assert!(first.state_of_health_pct.is_none());
    assert!(!first.synthetic);
    Ok(())
}

#[test]
fn accepts_legacy_localized_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("macau_charging_raw_data.csv");
    fs::write(
        &path,
        "时间戳,区域,用电负荷(kW),排队车辆数\n2024-07-01 09:00:00,Central,47.25,3\n",
    )?;

    let loaded = CsvSeriesStore::new(&path, beijing()).load()?;
    assert_eq!(loaded.records.len(), 1);
    assert_eq!(loaded.records[0].zone, "Central");
    assert_eq!(loaded.records[0].load_kw, 47.25);
    assert_eq!(loaded.records[0].queue_length, 3);
    Ok(())
}

#[test]
fn drops_malformed_rows_individually() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("history.csv");
    fs::write(
        &path,
        "timestamp,zone,load_kw,queue_length\n\
         2024-07-01 09:00:00,North,44.5,1\n\
         not-a-time,North,44.5,1\n\
         2024-07-01 09:01:00,North,lots,1\n\
         2024-07-01 09:02:00,,44.5,1\n\
         2024-07-01 09:03:00,North,NaN,1\n\
         2024-07-01 09:04:00,North,46.0\n\
         2024-07-01 09:05:00,North,43.0,2\n",
    )?;

    let loaded = CsvSeriesStore::new(&path, beijing()).load()?;
    assert_eq!(loaded.records.len(), 2);
    assert_eq!(loaded.dropped.len(), 5);
    assert_eq!(loaded.records[1].timestamp, ts(5));
    Ok(())
}

#[test]
fn duplicate_keys_keep_the_last_row() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("history.csv");
    fs::write(
        &path,
        "timestamp,zone,load_kw,queue_length\n\
         2024-07-01 09:00:05,North,10.0,1\n\
         2024-07-01 09:00:40,North,20.0,2\n",
    )?;

    let loaded = CsvSeriesStore::new(&path, beijing()).load()?;
    assert_eq!(loaded.records.len(), 1);
    assert_eq!(loaded.records[0].timestamp, ts(0));
    assert_eq!(loaded.records[0].load_kw, 20.0);
    Ok(())
}

#[test]
fn missing_file_is_unavailable() {
    let dir = tempdir().unwrap();
    let store = CsvSeriesStore::new(dir.path().join("absent.csv"), beijing());
    let err = store.load().unwrap_err();
    assert!(matches!(err, StoreError::Unavailable { .. }), "{err}");
}

#[test]
fn unknown_header_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("history.csv");
    fs::write(&path, "when,where\n1,2\n")?;
    let err = CsvSeriesStore::new(&path, beijing()).load().unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }), "{err}");
    Ok(())
}

#[test]
fn empty_file_loads_as_empty_series() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("history.csv");
    fs::write(&path, "")?;
    let loaded = CsvSeriesStore::new(&path, beijing()).load()?;
    assert!(loaded.records.is_empty());
    Ok(())
}

#[test]
fn save_upserts_and_preserves_optional_fields() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("history.csv");
    let store = CsvSeriesStore::new(&path, beijing());

    let mut synthetic = Record::observed(ts(1), "North", 50.0, 2);
    synthetic.synthetic = true;
    synthetic.v2g_profit = Some(0.0);
    synthetic.available_batteries = Some(17);
    let batch = vec![Record::observed(ts(0), "North", 44.0, 1), synthetic.clone()];

    assert_eq!(store.save(&batch)?, 2);
    assert_eq!(store.save(&batch)?, 2);

    let mut replacement = synthetic.clone();
    replacement.load_kw = 51.5;
    assert_eq!(store.save(&[replacement])?, 2);

    let loaded = store.load()?;
    assert_eq!(loaded.records.len(), 2);
    let restored = &loaded.records[1];
    assert!(restored.synthetic);
    assert_eq!(restored.load_kw, 51.5);
    assert_eq!(restored.v2g_profit, Some(0.0));
    assert_eq!(restored.available_batteries, Some(17));
    assert!(restored.fault_risk_pct.is_none());
    assert!(!path.with_extension("csv.tmp").exists());
    Ok(())
}

#[test]
fn save_keeps_rows_that_failed_to_parse() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("history.csv");
    fs::write(
        &path,
        "时间戳,区域,用电负荷(kW),排队车辆数\n\
         2024-07-01 09:00:00,North,44.5,1\n\
         2024-07-01 09:01:00,North,45.0,2.0\n",
    )?;
    let store = CsvSeriesStore::new(&path, beijing());

    assert_eq!(store.save(&[Record::observed(ts(2), "North", 46.0, 3)])?, 2);
    assert_eq!(store.save(&[Record::observed(ts(3), "North", 47.0, 0)])?, 3);

    let text = fs::read_to_string(&path)?;
    assert!(text.starts_with("timestamp,zone,load_kw,queue_length,"));
    assert_eq!(text.matches("2024-07-01 09:01:00,North,45.0,2.0").count(), 1);

    let loaded = store.load()?;
    assert_eq!(loaded.records.len(), 3);
    assert_eq!(loaded.dropped.len(), 1);
    assert_eq!(loaded.records[0].timestamp, ts(0));
    Ok(())
}
