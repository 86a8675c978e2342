//! ---
//! cw_section: "03-persistence-logging"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Series store contract and the in-memory backend."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

use cw_common::record::{Record, Series, Timestamp};
use parking_lot::RwLock;

use crate::{Result, StoreError};

/// A stored row that could not be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    /// One-based line number in the backing file, when known.
    pub line: Option<u64>,
    /// Why the row was rejected.
    pub reason: String,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Default)]
pub struct LoadedSeries {
    /// Parsed records ordered by `(timestamp, zone)` with unique keys.
    pub records: Series,
    /// Rows dropped individually while loading.
    pub dropped: Vec<DroppedRow>,
}

/// Source of truth for telemetry history.
pub trait SeriesStore: Send + Sync + Debug {
    /// Load the stored history.
    fn load(&self) -> Result<LoadedSeries>;

    /// Upsert `records` keyed by `(timestamp, zone)`; returns the stored row count.
    ///
    /// Saving the same records twice leaves the store unchanged.
    fn save(&self, records: &[Record]) -> Result<usize>;

    /// Human-readable location used in log events.
    fn describe(&self) -> String;
}

/// Merge `incoming` into `existing` by `(timestamp, zone)`, last write wins.
///
/// The result is ordered by timestamp, then zone name.
pub fn upsert(existing: Series, incoming: &[Record]) -> Series {
    let mut merged: BTreeMap<(Timestamp, String), Record> = BTreeMap::new();
    for record in existing.into_iter().chain(incoming.iter().cloned()) {
        merged.insert((record.timestamp, record.zone.clone()), record);
    }
    merged.into_values().collect()
}

/// Volatile store used by tests and by deployments without a history file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Series>,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create a store pre-populated with `records`.
    pub fn new(records: Series) -> Self {
        Self {
            records: RwLock::new(upsert(Vec::new(), &records)),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `load` and `save` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copy of the stored records.
    pub fn records(&self) -> Series {
        self.records.read().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("memory store marked as failing".into()));
        }
        Ok(())
    }
}

impl SeriesStore for MemoryStore {
    fn load(&self) -> Result<LoadedSeries> {
        self.check()?;
        Ok(LoadedSeries {
            records: self.records(),
            dropped: Vec::new(),
        })
    }

    fn save(&self, records: &[Record]) -> Result<usize> {
        self.check()?;
        let mut stored = self.records.write();
        let current = std::mem::take(&mut *stored);
        *stored = upsert(current, records);
        Ok(stored.len())
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}
