//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Shared primitives and utilities for the monitor runtime."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
//! Core shared primitives for the ChargeWatch workspace.
//! This crate exposes the telemetry record model, configuration loading,
//! time sources, the degraded-condition taxonomy, and logging bootstrap
//! consumed across the workspace.

pub mod condition;
pub mod config;
pub mod logging;
pub mod record;
pub mod time;

pub use condition::Condition;
pub use config::{
    AlertConfig, AppConfig, ClockConfig, ContinuityConfig, DerivedConfig, GeneratorConfig,
    LoadedAppConfig, LoggingConfig, QueueRange, RefreshConfig, StoreBackend, StoreConfig,
    ZoneConfig,
};
pub use logging::{init_console, init_tracing, LogFormat};
pub use record::{truncate_to_minute, Record, Series, Timestamp};
pub use time::{FixedClock, SteppingClock, SystemClock, TimeSource};
