//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Telemetry record model shared by the store, generator, and engine."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

/// Instant in the monitor's fixed time-zone convention, at minute resolution.
pub type Timestamp = DateTime<FixedOffset>;

/// Ordered telemetry records; ascending by timestamp, one row per `(timestamp, zone)`.
pub type Series = Vec<Record>;

/// One per-minute telemetry sample for a charging zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: Timestamp,
    pub zone: String,
    pub load_kw: f64,
    pub queue_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_of_health_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbon_saved_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_batteries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub green_energy_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v2g_profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_risk_pct: Option<f64>,
    /// Set on rows produced by backfill rather than observed telemetry.
    #[serde(default)]
    pub synthetic: bool,
}

impl Record {
    /// Construct an observed record carrying only the mandatory columns.
    pub fn observed(
        timestamp: Timestamp,
        zone: impl Into<String>,
        load_kw: f64,
        queue_length: u32,
    ) -> Self {
        Self {
            timestamp,
            zone: zone.into(),
            load_kw,
            queue_length,
            state_of_health_pct: None,
            carbon_saved_kg: None,
            available_batteries: None,
            green_energy_pct: None,
            v2g_profit: None,
            fault_risk_pct: None,
            synthetic: false,
        }
    }

    /// Unique key of the record across a series.
    pub fn key(&self) -> (Timestamp, &str) {
        (self.timestamp, self.zone.as_str())
    }
}

/// Drop seconds and sub-second precision, keeping the offset.
pub fn truncate_to_minute(ts: Timestamp) -> Timestamp {
    ts.with_second(0)
        .and_then(|ts| ts.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncation_keeps_offset_and_minute() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 5, 1, 18, 42, 37).unwrap();
        let truncated = truncate_to_minute(ts);
        assert_eq!(truncated, offset.with_ymd_and_hms(2024, 5, 1, 18, 42, 0).unwrap());
        assert_eq!(truncated.offset(), &offset);
    }

    #[test]
    fn observed_records_are_not_synthetic() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = Record::observed(ts, "North", 40.5, 1);
        assert!(!record.synthetic);
        assert_eq!(record.key(), (ts, "North"));
        assert!(record.carbon_saved_kg.is_none());
    }
}
