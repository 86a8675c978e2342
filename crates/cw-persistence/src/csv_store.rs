//! ---
//! cw_section: "03-persistence-logging"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "CSV-backed series store with row-tolerant loading."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use csv::{ByteRecord, ReaderBuilder, Trim, WriterBuilder};
use cw_common::record::{truncate_to_minute, Record, Timestamp};
use cw_common::Condition;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{upsert, DroppedRow, LoadedSeries, SeriesStore};
use crate::{Result, StoreError};

const TIMESTAMP_COLUMNS: [&str; 2] = ["timestamp", "时间戳"];
const ZONE_COLUMNS: [&str; 2] = ["zone", "区域"];
/// Column order written by `save`, with the legacy header name each column may carry.
const COLUMNS: [(&str, Option<&str>); 11] = [
    ("timestamp", Some("时间戳")),
    ("zone", Some("区域")),
    ("load_kw", Some("用电负荷(kW)")),
    ("queue_length", Some("排队车辆数")),
    ("state_of_health_pct", None),
    ("carbon_saved_kg", None),
    ("available_batteries", None),
    ("green_energy_pct", None),
    ("v2g_profit", None),
    ("fault_risk_pct", None),
    ("synthetic", None),
];
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Row layout of the history file.
///
/// The aliases accept files written by the legacy dashboard, whose header used
/// localized column names for the four mandatory columns.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(alias = "时间戳")]
    timestamp: String,
    #[serde(alias = "区域")]
    zone: String,
    #[serde(alias = "用电负荷(kW)")]
    load_kw: f64,
    #[serde(alias = "排队车辆数")]
    queue_length: u32,
    #[serde(default)]
    state_of_health_pct: Option<f64>,
    #[serde(default)]
    carbon_saved_kg: Option<f64>,
    #[serde(default)]
    available_batteries: Option<u32>,
    #[serde(default)]
    green_energy_pct: Option<f64>,
    #[serde(default)]
    v2g_profit: Option<f64>,
    #[serde(default)]
    fault_risk_pct: Option<f64>,
    #[serde(default)]
    synthetic: Option<bool>,
}

impl CsvRow {
    fn into_record(self, offset: FixedOffset) -> std::result::Result<Record, String> {
        let timestamp = parse_timestamp(&self.timestamp, offset)
            .ok_or_else(|| format!("unparseable timestamp '{}'", self.timestamp))?;
        let zone = self.zone.trim();
        if zone.is_empty() {
            return Err("empty zone".to_owned());
        }
        if !self.load_kw.is_finite() {
            return Err(format!("non-finite load {}", self.load_kw));
        }
        let mut record = Record::observed(timestamp, zone, self.load_kw, self.queue_length);
        record.state_of_health_pct = self.state_of_health_pct;
        record.carbon_saved_kg = self.carbon_saved_kg;
        record.available_batteries = self.available_batteries;
        record.green_energy_pct = self.green_energy_pct;
        record.v2g_profit = self.v2g_profit;
        record.fault_risk_pct = self.fault_risk_pct;
        record.synthetic = self.synthetic.unwrap_or(false);
        Ok(record)
    }

    fn from_record(record: &Record) -> Self {
        Self {
            timestamp: record.timestamp.to_rfc3339(),
            zone: record.zone.clone(),
            load_kw: record.load_kw,
            queue_length: record.queue_length,
            state_of_health_pct: record.state_of_health_pct,
            carbon_saved_kg: record.carbon_saved_kg,
            available_batteries: record.available_batteries,
            green_energy_pct: record.green_energy_pct,
            v2g_profit: record.v2g_profit,
            fault_risk_pct: record.fault_risk_pct,
            synthetic: Some(record.synthetic),
        }
    }
}

/// Parse RFC 3339 or naive local timestamps into the store offset, truncated to the minute.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(truncate_to_minute(ts.with_timezone(&offset)));
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .and_then(|naive| offset.from_local_datetime(&naive).single())
            .map(truncate_to_minute)
    })
}

/// Rows that failed to parse, rearranged into the `COLUMNS` layout so `save` can
/// write them back untouched.
#[derive(Debug, Default)]
struct RejectedRows(Vec<ByteRecord>);

/// Position of every `COLUMNS` entry within a file header.
fn column_layout(headers: &ByteRecord) -> Vec<Option<usize>> {
    COLUMNS
        .iter()
        .map(|(name, legacy)| {
            headers.iter().position(|field| {
                field == name.as_bytes() || legacy.is_some_and(|alias| field == alias.as_bytes())
            })
        })
        .collect()
}

fn rearrange(raw: &ByteRecord, layout: &[Option<usize>]) -> ByteRecord {
    layout
        .iter()
        .map(|index| index.and_then(|i| raw.get(i)).unwrap_or_default())
        .collect()
}

/// History file in CSV form.
#[derive(Debug, Clone)]
pub struct CsvSeriesStore {
    path: PathBuf,
    offset: FixedOffset,
}

impl CsvSeriesStore {
    /// Store at `path`; naive timestamps are read in `offset`.
    pub fn new(path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn write_all(&self, records: &[Record], rejected: &RejectedRows) -> Result<()> {
        let write_err = |source: csv::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| write_err(csv::Error::from(err)))?;
            }
        }
        let staging = self.path.with_extension("csv.tmp");
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(&staging)
            .map_err(write_err)?;
        writer
            .write_record(COLUMNS.iter().map(|(name, _)| *name))
            .map_err(write_err)?;
        for record in records {
            writer
                .serialize(CsvRow::from_record(record))
                .map_err(write_err)?;
        }
        for row in &rejected.0 {
            writer.write_byte_record(row).map_err(write_err)?;
        }
        writer
            .flush()
            .map_err(|err| write_err(csv::Error::from(err)))?;
        fs::rename(&staging, &self.path).map_err(|err| write_err(csv::Error::from(err)))?;
        Ok(())
    }
}

impl CsvSeriesStore {
    fn read(&self) -> Result<(LoadedSeries, RejectedRows)> {
        let file = File::open(&self.path).map_err(|source| StoreError::Unavailable {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|err| self.corrupt(format!("unreadable header: {err}")))?
            .clone();
        if headers.is_empty() {
            debug!(path = %self.path.display(), "history file is empty");
            return Ok((LoadedSeries::default(), RejectedRows::default()));
        }
        let has_column = |names: &[&str]| headers.iter().any(|h| names.contains(&h));
        if !has_column(&TIMESTAMP_COLUMNS) || !has_column(&ZONE_COLUMNS) {
            return Err(self.corrupt("header lacks timestamp or zone column"));
        }
        let byte_headers = headers.as_byte_record().clone();
        let layout = column_layout(&byte_headers);

        let mut records = Vec::new();
        let mut dropped = Vec::new();
        let mut rejected = RejectedRows::default();
        for row in reader.byte_records() {
            let raw = match row {
                Ok(raw) => raw,
                Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(self.corrupt(format!("stream interrupted: {err}")));
                }
                Err(err) => return Err(self.corrupt(format!("unreadable row: {err}"))),
            };
            let line = raw.position().map(|pos| pos.line());
            let outcome = raw
                .deserialize::<CsvRow>(Some(&byte_headers))
                .map_err(|err| err.to_string())
                .and_then(|row| row.into_record(self.offset));
            match outcome {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(
                        path = %self.path.display(),
                        condition = %Condition::MalformedRecord,
                        line = line.unwrap_or_default(),
                        reason = %reason,
                        "dropping malformed history row"
                    );
                    dropped.push(DroppedRow { line, reason });
                    rejected.0.push(rearrange(&raw, &layout));
                }
            }
        }

        let parsed = records.len();
        let records = upsert(Vec::new(), &records);
        debug!(
            path = %self.path.display(),
            parsed,
            unique = records.len(),
            dropped = dropped.len(),
            "history loaded"
        );
        Ok((LoadedSeries { records, dropped }, rejected))
    }
}

impl SeriesStore for CsvSeriesStore {
    fn load(&self) -> Result<LoadedSeries> {
        self.read().map(|(loaded, _)| loaded)
    }

    /// Upserts `records` into the file. Rows the loader could not parse are kept
    /// after the parsed ones.
    fn save(&self, records: &[Record]) -> Result<usize> {
        let (existing, rejected) = match self.read() {
            Ok((loaded, rejected)) => (loaded.records, rejected),
            Err(StoreError::Unavailable { source, .. }) if source.kind() == ErrorKind::NotFound => {
                (Vec::new(), RejectedRows::default())
            }
            Err(err) => return Err(err),
        };
        let merged = upsert(existing, records);
        self.write_all(&merged, &rejected)?;
        debug!(
            path = %self.path.display(),
            rows = merged.len(),
            kept_unparsed = rejected.0.len(),
            "history saved"
        );
        Ok(merged.len())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
