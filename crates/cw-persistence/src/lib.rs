//! ---
//! cw_section: "03-persistence-logging"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Series store abstractions and storage bindings."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Storage for per-zone telemetry history.
//!
//! Stores report failures as typed [`StoreError`]s; deciding to degrade to an
//! empty series is left to the caller. Individual unparseable rows never fail a
//! load, they are dropped and listed in [`LoadedSeries::dropped`].

use std::path::PathBuf;

use cw_common::Condition;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file is missing or cannot be read.
    #[error("store {} unavailable: {source}", .path.display())]
    Unavailable {
        /// Location of the backing file.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// The backing file exists but its header or stream is unreadable.
    #[error("store {} is corrupt: {reason}", .path.display())]
    Corrupt {
        /// Location of the backing file.
        path: PathBuf,
        /// Human-readable description of the corruption.
        reason: String,
    },
    /// Persisting records failed.
    #[error("failed to write store {}: {source}", .path.display())]
    Write {
        /// Location of the backing file.
        path: PathBuf,
        /// Underlying CSV or IO failure.
        #[source]
        source: csv::Error,
    },
    /// Failure injected by an in-memory store.
    #[error("injected store failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Degraded condition this error is absorbed as.
    pub fn condition(&self) -> Condition {
        Condition::StoreUnavailable
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "unavailable",
            StoreError::Corrupt { .. } => "corrupt",
            StoreError::Write { .. } => "write",
            StoreError::Injected(_) => "injected",
        }
    }
}

/// CSV file backend.
pub mod csv_store;
/// Store contract, upsert merge, and the in-memory backend.
pub mod store;

pub use csv_store::CsvSeriesStore;
pub use store::{upsert, DroppedRow, LoadedSeries, MemoryStore, SeriesStore};
