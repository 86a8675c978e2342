//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Configuration model, loading, and validation."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_zones() -> IndexMap<String, ZoneConfig> {
    let mut zones = IndexMap::new();
    zones.insert("North".to_owned(), ZoneConfig::new(45.0));
    zones.insert("Central".to_owned(), ZoneConfig::new(45.0));
    zones.insert(
        "Cotai".to_owned(),
        ZoneConfig {
            base_load_kw: 65.0,
            high_traffic: true,
        },
    );
    zones
}

fn default_peak_start_hour() -> u32 {
    18
}

fn default_peak_end_hour() -> u32 {
    22
}

fn default_peak_multiplier() -> f64 {
    1.7
}

fn default_noise_std_dev() -> f64 {
    5.0
}

fn default_queue_load_threshold() -> f64 {
    85.0
}

fn default_busy_queue() -> QueueRange {
    QueueRange { min: 4, max: 8 }
}

fn default_idle_queue() -> QueueRange {
    QueueRange { min: 0, max: 2 }
}

fn default_retention_minutes() -> u32 {
    12 * 60
}

fn default_max_backfill_minutes() -> u32 {
    24 * 60
}

fn default_staleness_minutes() -> u32 {
    60
}

fn default_load_threshold() -> f64 {
    180.0
}

fn default_queue_threshold() -> f64 {
    5.0
}

fn default_wait_slope() -> f64 {
    4.0
}

fn default_wait_intercept() -> f64 {
    5.0
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/charging_history.csv")
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_true() -> bool {
    true
}

/// Primary configuration object for the ChargeWatch runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default = "default_zones")]
    pub zones: IndexMap<String, ZoneConfig>,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub continuity: ContinuityConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CW_CONFIG";

    /// Load configuration from disk, respecting the `CW_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `CW_CONFIG` path must exist; candidate paths are optional and
    /// the built-in defaults apply when none of them is present.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        Self::load_with_override(None, candidates)
    }

    /// Like [`AppConfig::load_with_source`], with an operator-supplied path
    /// (e.g. `--config`) ranked after `CW_CONFIG` and before the candidates.
    /// Like `CW_CONFIG`, that path must exist.
    pub fn load_with_override<P: AsRef<Path>>(
        explicit: Option<&Path>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        let env_path = std::env::var(Self::ENV_CONFIG_PATH)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        if let Some(path) = env_path.or_else(|| explicit.map(Path::to_path_buf)) {
            let config = Self::from_path(&path)?;
            return Ok(LoadedAppConfig {
                config,
                source: Some(path),
            });
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Zone names in declaration order.
    pub fn zone_names(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.clock.offset()?;
        if self.zones.is_empty() {
            bail!("configuration must declare at least one zone");
        }
        for (name, zone) in &self.zones {
            if name.trim().is_empty() {
                bail!("zone names cannot be empty");
            }
            if !zone.base_load_kw.is_finite() || zone.base_load_kw < 0.0 {
                bail!("zone '{}' base_load_kw must be a non-negative number", name);
            }
        }
        self.generator.validate()?;
        self.continuity.validate()?;
        self.alert.validate()?;
        if self.refresh.interval.is_zero() {
            bail!("refresh interval must be greater than zero");
        }
        if self.refresh.max_cycles == Some(0) {
            bail!("refresh max_cycles must be greater than zero when set");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            zones: default_zones(),
            generator: GeneratorConfig::default(),
            continuity: ContinuityConfig::default(),
            alert: AlertConfig::default(),
            store: StoreConfig::default(),
            refresh: RefreshConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Whole-hour offset from UTC applied to every timestamp.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

impl ClockConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        if !(-14..=14).contains(&self.utc_offset_hours) {
            return Err(anyhow!(
                "utc_offset_hours {} is outside -14..=14",
                self.utc_offset_hours
            ));
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or_else(|| anyhow!("invalid utc offset {}", self.utc_offset_hours))
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneConfig {
    pub base_load_kw: f64,
    /// Marks the zone that carries materially more traffic than the others.
    #[serde(default)]
    pub high_traffic: bool,
}

impl ZoneConfig {
    pub fn new(base_load_kw: f64) -> Self {
        Self {
            base_load_kw,
            high_traffic: false,
        }
    }
}

/// Inclusive integer range for queue-length draws.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// First hour (local) of the evening peak window.
    #[serde(default = "default_peak_start_hour")]
    pub peak_start_hour: u32,
    /// Last hour (local, inclusive) of the evening peak window.
    #[serde(default = "default_peak_end_hour")]
    pub peak_end_hour: u32,
    #[serde(default = "default_peak_multiplier")]
    pub peak_multiplier: f64,
    #[serde(default = "default_noise_std_dev")]
    pub noise_std_dev_kw: f64,
    /// Load above which the busy queue regime applies.
    #[serde(default = "default_queue_load_threshold")]
    pub queue_load_threshold_kw: f64,
    #[serde(default = "default_busy_queue")]
    pub busy_queue: QueueRange,
    #[serde(default = "default_idle_queue")]
    pub idle_queue: QueueRange,
    /// Fixed seed for reproducible backfill; a fresh seed is drawn per cycle when unset.
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub derived: DerivedConfig,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.peak_start_hour > 23 || self.peak_end_hour > 23 {
            bail!("peak hours must be within 0..=23");
        }
        if self.peak_start_hour > self.peak_end_hour {
            bail!(
                "peak_start_hour {} is after peak_end_hour {}",
                self.peak_start_hour,
                self.peak_end_hour
            );
        }
        if !self.peak_multiplier.is_finite() || self.peak_multiplier <= 0.0 {
            bail!("peak_multiplier must be a positive number");
        }
        if !self.noise_std_dev_kw.is_finite() || self.noise_std_dev_kw < 0.0 {
            bail!("noise_std_dev_kw must be a non-negative number");
        }
        if !self.queue_load_threshold_kw.is_finite() {
            bail!("queue_load_threshold_kw must be finite");
        }
        for (label, range) in [("busy_queue", self.busy_queue), ("idle_queue", self.idle_queue)] {
            if range.min > range.max {
                bail!("{} min {} exceeds max {}", label, range.min, range.max);
            }
        }
        self.derived.validate()
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            peak_start_hour: default_peak_start_hour(),
            peak_end_hour: default_peak_end_hour(),
            peak_multiplier: default_peak_multiplier(),
            noise_std_dev_kw: default_noise_std_dev(),
            queue_load_threshold_kw: default_queue_load_threshold(),
            busy_queue: default_busy_queue(),
            idle_queue: default_idle_queue(),
            random_seed: None,
            derived: DerivedConfig::default(),
        }
    }
}

/// Constants for the optional operational fields attached to synthetic records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivedConfig {
    pub enabled: bool,
    pub state_of_health_base_pct: f64,
    pub state_of_health_jitter_pct: f64,
    pub emission_factor_kg_per_kwh: f64,
    pub battery_capacity: u32,
    pub battery_consumption_max: u32,
    pub high_load_battery_penalty: u32,
    pub green_energy_base_pct: f64,
    pub green_energy_spread_pct: f64,
    pub v2g_profit_min: f64,
    pub v2g_profit_max: f64,
    pub fault_risk_min_pct: f64,
    pub fault_risk_max_pct: f64,
}

impl DerivedConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for (label, value) in [
            ("state_of_health_base_pct", self.state_of_health_base_pct),
            ("state_of_health_jitter_pct", self.state_of_health_jitter_pct),
            ("emission_factor_kg_per_kwh", self.emission_factor_kg_per_kwh),
            ("green_energy_base_pct", self.green_energy_base_pct),
            ("green_energy_spread_pct", self.green_energy_spread_pct),
            ("v2g_profit_min", self.v2g_profit_min),
            ("v2g_profit_max", self.v2g_profit_max),
            ("fault_risk_min_pct", self.fault_risk_min_pct),
            ("fault_risk_max_pct", self.fault_risk_max_pct),
        ] {
            if !value.is_finite() {
                bail!("derived {} must be finite", label);
            }
        }
        if self.state_of_health_jitter_pct < 0.0 || self.green_energy_spread_pct < 0.0 {
            bail!("derived jitter and spread values must be non-negative");
        }
        if self.v2g_profit_min > self.v2g_profit_max {
            bail!("v2g_profit_min exceeds v2g_profit_max");
        }
        if self.fault_risk_min_pct > self.fault_risk_max_pct {
            bail!("fault_risk_min_pct exceeds fault_risk_max_pct");
        }
        Ok(())
    }
}

impl Default for DerivedConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            state_of_health_base_pct: 98.5,
            state_of_health_jitter_pct: 1.5,
            emission_factor_kg_per_kwh: 0.42,
            battery_capacity: 20,
            battery_consumption_max: 5,
            high_load_battery_penalty: 5,
            green_energy_base_pct: 35.0,
            green_energy_spread_pct: 15.0,
            v2g_profit_min: 5.0,
            v2g_profit_max: 25.0,
            fault_risk_min_pct: 0.1,
            fault_risk_max_pct: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    /// Trailing history kept after each reconciliation.
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u32,
    /// Hard ceiling on synthetic minutes generated per reconciliation.
    #[serde(default = "default_max_backfill_minutes")]
    pub max_backfill_minutes: u32,
    /// History whose newest record is older than this is discarded instead of extended.
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: u32,
}

impl ContinuityConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.retention_minutes))
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.staleness_minutes))
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_minutes == 0 {
            bail!("retention_minutes must be greater than zero");
        }
        if self.max_backfill_minutes == 0 {
            bail!("max_backfill_minutes must be greater than zero");
        }
        if self.staleness_minutes == 0 {
            bail!("staleness_minutes must be greater than zero");
        }
        Ok(())
    }
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            retention_minutes: default_retention_minutes(),
            max_backfill_minutes: default_max_backfill_minutes(),
            staleness_minutes: default_staleness_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Total snapshot load above which the network is in alert.
    #[serde(default = "default_load_threshold")]
    pub load_threshold_kw: f64,
    /// Mean queue length above which the network is in alert.
    #[serde(default = "default_queue_threshold")]
    pub queue_threshold: f64,
    #[serde(default = "default_wait_slope")]
    pub wait_slope: f64,
    #[serde(default = "default_wait_intercept")]
    pub wait_intercept: f64,
    /// Consecutive disagreeing cycles required before the published state flips.
    /// Zero keeps the memoryless per-cycle classification.
    #[serde(default)]
    pub debounce_cycles: u32,
}

impl AlertConfig {
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("load_threshold_kw", self.load_threshold_kw),
            ("queue_threshold", self.queue_threshold),
            ("wait_slope", self.wait_slope),
            ("wait_intercept", self.wait_intercept),
        ] {
            if !value.is_finite() {
                bail!("alert {} must be finite", label);
            }
        }
        Ok(())
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            load_threshold_kw: default_load_threshold(),
            queue_threshold: default_queue_threshold(),
            wait_slope: default_wait_slope(),
            wait_intercept: default_wait_intercept(),
            debounce_cycles: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Csv,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Write synthetic backfill back to the store as keyed upserts.
    #[serde(default)]
    pub persist_backfill: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Csv,
            path: default_store_path(),
            persist_backfill: false,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    /// Stop after this many cycles; runs until shutdown when unset.
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: default_refresh_interval(),
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
