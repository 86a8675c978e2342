//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Continuity engine, snapshot extraction, and refresh lifecycle."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
//! Keeps a per-zone telemetry series complete up to the current minute.
//!
//! [`ContinuityEngine`] bounds and backfills the gap between stored history and
//! `now`, [`SnapshotExtractor`] derives the latest cross-zone view and alert
//! state, and [`RefreshLoop`] drives both on a fixed interval.

pub mod continuity;
pub mod metrics;
pub mod presentation;
pub mod refresh;
pub mod snapshot;

pub use continuity::{ContinuityEngine, Reconciliation, ReconcileReport};
pub use metrics::{encode_text, new_registry, ContinuityMetrics, SharedRegistry};
pub use presentation::{PresentationAdapter, TracingRenderer};
pub use refresh::{
    load_or_empty, CycleOutcome, History, RefreshHandle, RefreshLoop, RefreshStats,
};
pub use snapshot::{Aggregate, AlertDebouncer, Classification, Snapshot, SnapshotExtractor};
