//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Degraded-condition taxonomy absorbed by the continuity engine."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;

/// Failure conditions that are absorbed locally instead of reaching the caller.
///
/// Each variant maps to a stable label used in log events and metric labels so
/// that operators can tell the causes apart even though none of them abort a
/// refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Store file missing, unreadable, or corrupt; history degrades to empty.
    StoreUnavailable,
    /// A single stored row could not be parsed and was dropped.
    MalformedRecord,
    /// The clock reported an instant older than the newest known record.
    ClockRegression,
    /// The gap exceeded the backfill ceiling and was clamped.
    GenerationOverflow,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::StoreUnavailable,
        Condition::MalformedRecord,
        Condition::ClockRegression,
        Condition::GenerationOverflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::StoreUnavailable => "store_unavailable",
            Condition::MalformedRecord => "malformed_record",
            Condition::ClockRegression => "clock_regression",
            Condition::GenerationOverflow => "generation_overflow",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
