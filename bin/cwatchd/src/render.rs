//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "binary"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Console and JSON renderers for refreshed snapshots."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use cw_common::record::Record;
use cw_core::{Classification, PresentationAdapter, Snapshot};
use serde_json::json;
use tracing::warn;

/// Plain-text summary followed by one line per configured zone.
#[derive(Debug)]
pub struct ConsoleRenderer {
    zones: Vec<String>,
}

impl ConsoleRenderer {
    pub fn new(zones: Vec<String>) -> Self {
        Self { zones }
    }
}

impl PresentationAdapter for ConsoleRenderer {
    fn render(&mut self, series: &[Record], snapshot: &Snapshot, classification: Classification) {
        let Some(timestamp) = snapshot.timestamp else {
            println!("no telemetry available");
            return;
        };
        let aggregate = &snapshot.aggregate;
        println!(
            "{}  {:<6}  load {:>8.2} kW  queue {:>5.2}  wait ~{} min  ({} records)",
            timestamp.format("%Y-%m-%d %H:%M"),
            classification.as_str().to_uppercase(),
            aggregate.total_load_kw,
            aggregate.avg_queue,
            aggregate.wait_time_minutes,
            series.len()
        );
        for zone in &self.zones {
            match snapshot.records.iter().find(|record| &record.zone == zone) {
                Some(record) => println!(
                    "  {:<12} {:>8.2} kW  queue {:>2}{}",
                    zone,
                    record.load_kw,
                    record.queue_length,
                    if record.synthetic { "  *" } else { "" }
                ),
                None => println!("  {:<12} {:>8}", zone, "-"),
            }
        }
        if let Some(risk) = aggregate.max_fault_risk_pct {
            println!(
                "  batteries {}  carbon saved {:.2} kg  max fault risk {:.2}%",
                aggregate.available_batteries.unwrap_or_default(),
                aggregate.total_carbon_saved_kg.unwrap_or_default(),
                risk
            );
        }
    }
}

/// One JSON document per cycle on stdout.
#[derive(Debug, Default)]
pub struct JsonRenderer;

impl PresentationAdapter for JsonRenderer {
    fn render(&mut self, series: &[Record], snapshot: &Snapshot, classification: Classification) {
        let document = json!({
            "timestamp": snapshot.timestamp,
            "records": series.len(),
            "classification": classification,
            "raw_classification": snapshot.classification,
            "aggregate": &snapshot.aggregate,
            "zones": &snapshot.records,
        });
        match serde_json::to_string(&document) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "failed to encode snapshot"),
        }
    }
}
