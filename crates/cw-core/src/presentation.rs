//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Presentation seam for rendering refreshed series."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use cw_common::record::Record;
use tracing::{info, warn};

use crate::snapshot::{Classification, Snapshot};

/// Receives the series and snapshot after every refresh cycle.
///
/// Renderers must not fail the cycle; anything they cannot display is theirs to log.
pub trait PresentationAdapter: Send {
    fn render(&mut self, series: &[Record], snapshot: &Snapshot, classification: Classification);
}

/// Emits one structured event per cycle.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    last: Option<Classification>,
}

impl PresentationAdapter for TracingRenderer {
    fn render(&mut self, series: &[Record], snapshot: &Snapshot, classification: Classification) {
        let aggregate = &snapshot.aggregate;
        let timestamp = snapshot
            .timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        info!(
            timestamp = %timestamp,
            records = series.len(),
            zones = aggregate.zone_count,
            total_load_kw = aggregate.total_load_kw,
            avg_queue = aggregate.avg_queue,
            wait_minutes = aggregate.wait_time_minutes,
            classification = %classification,
            "snapshot"
        );
        if classification.is_alert() && self.last != Some(Classification::Alert) {
            warn!(
                total_load_kw = aggregate.total_load_kw,
                avg_queue = aggregate.avg_queue,
                "network entered alert state"
            );
        }
        self.last = Some(classification);
    }
}
