//! ---
//! cw_section: "11-simulation"
//! cw_subsection: "01-bootstrap"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Simulation module exports."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
//! Synthetic telemetry used to backfill gaps in charging-zone history.
//!
//! The generator is a stochastic placeholder with a fixed shape (per-zone base
//! load, evening peak multiplier, two-regime queue draw). It is not a forecast.

pub mod generator;

pub use generator::{GeneratorError, SyntheticRecordGenerator};
