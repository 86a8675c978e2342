//! ---
//! cw_section: "11-simulation"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Keyed stochastic generator for synthetic zone records."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use chrono::Timelike;
use cw_common::config::{GeneratorConfig, ZoneConfig};
use cw_common::record::{Record, Timestamp};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator requires at least one zone")]
    NoZones,
    #[error("invalid load noise standard deviation {0}")]
    InvalidNoise(f64),
}

/// Produces one synthetic [`Record`] per `(timestamp, zone)`.
///
/// Every record is drawn from an RNG seeded by hashing the generator seed with
/// the record key, so `generate` is a pure function of its inputs and callers may
/// evaluate keys in any order or in parallel.
#[derive(Debug, Clone)]
pub struct SyntheticRecordGenerator {
    zones: IndexMap<String, ZoneConfig>,
    config: GeneratorConfig,
    noise: Normal<f64>,
    seed: u64,
}

impl SyntheticRecordGenerator {
    pub fn new(
        zones: &IndexMap<String, ZoneConfig>,
        config: &GeneratorConfig,
    ) -> Result<Self, GeneratorError> {
        if zones.is_empty() {
            return Err(GeneratorError::NoZones);
        }
        let noise = Normal::new(0.0, config.noise_std_dev_kw)
            .map_err(|_| GeneratorError::InvalidNoise(config.noise_std_dev_kw))?;
        Ok(Self {
            zones: zones.clone(),
            config: config.clone(),
            noise,
            seed: config.random_seed.unwrap_or_else(rand::random),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Replace the seed, changing every subsequent draw.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Zone names in configuration order.
    pub fn zones(&self) -> impl Iterator<Item = &str> + '_ {
        self.zones.keys().map(String::as_str)
    }

    /// Position of `zone` in the configured zone order.
    pub fn zone_index(&self, zone: &str) -> Option<usize> {
        self.zones.get_index_of(zone)
    }

    /// Base load for a zone; zero for zones outside the configured set.
    pub fn base_load(&self, zone: &str) -> f64 {
        self.zones
            .get(zone)
            .map(|profile| profile.base_load_kw)
            .unwrap_or(0.0)
    }

    pub fn is_peak_hour(&self, hour: u32) -> bool {
        (self.config.peak_start_hour..=self.config.peak_end_hour).contains(&hour)
    }

    /// Load multiplier for a local hour of day.
    pub fn peak_factor(&self, hour: u32) -> f64 {
        if self.is_peak_hour(hour) {
            self.config.peak_multiplier
        } else {
            1.0
        }
    }

    pub fn generate(&self, timestamp: Timestamp, zone: &str) -> Record {
        let mut rng = self.rng_for(timestamp, zone);
        let peak = self.is_peak_hour(timestamp.hour());

        // Not clamped: noise can push light zones below zero.
        let load = round2(
            self.base_load(zone) * self.peak_factor(timestamp.hour())
                + self.noise.sample(&mut rng),
        );
        let busy = load > self.config.queue_load_threshold_kw;
        let queue_range = if busy {
            self.config.busy_queue
        } else {
            self.config.idle_queue
        };
        let queue_length = rng.gen_range(queue_range.min..=queue_range.max);

        let mut record = Record::observed(timestamp, zone, load, queue_length);
        record.synthetic = true;

        let derived = &self.config.derived;
        if derived.enabled {
            record.state_of_health_pct = Some(round2(
                derived.state_of_health_base_pct
                    - rng.gen_range(0.0..=derived.state_of_health_jitter_pct),
            ));
            record.carbon_saved_kg = Some(round2(load * derived.emission_factor_kg_per_kwh));
            let consumed = rng.gen_range(0..=derived.battery_consumption_max);
            let penalty = if busy {
                derived.high_load_battery_penalty
            } else {
                0
            };
            record.available_batteries = Some(
                derived
                    .battery_capacity
                    .saturating_sub(consumed)
                    .saturating_sub(penalty),
            );
            record.green_energy_pct = Some(round2(
                derived.green_energy_base_pct + rng.gen_range(0.0..=derived.green_energy_spread_pct),
            ));
            record.v2g_profit = Some(if peak {
                round2(rng.gen_range(derived.v2g_profit_min..=derived.v2g_profit_max))
            } else {
                0.0
            });
            record.fault_risk_pct = Some(round2(
                rng.gen_range(derived.fault_risk_min_pct..=derived.fault_risk_max_pct),
            ));
        }
        record
    }

    fn rng_for(&self, timestamp: Timestamp, zone: &str) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(timestamp.timestamp().to_le_bytes());
        hasher.update(zone.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        StdRng::seed_from_u64(u64::from_le_bytes(bytes))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn at(hour: u32, minute: u32) -> Timestamp {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, hour, minute, 0)
            .unwrap()
    }

    fn zones() -> IndexMap<String, ZoneConfig> {
        let mut zones = IndexMap::new();
        zones.insert("Quiet".to_owned(), ZoneConfig::new(45.0));
        zones.insert("Busy".to_owned(), ZoneConfig::new(90.0));
        zones.insert("Idle".to_owned(), ZoneConfig::new(0.0));
        zones
    }

    fn generator(noise: f64) -> SyntheticRecordGenerator {
        let config = GeneratorConfig {
            noise_std_dev_kw: noise,
            ..GeneratorConfig::default()
        };
        SyntheticRecordGenerator::new(&zones(), &config)
            .unwrap()
            .with_seed(7)
    }

    #[test]
    fn generation_is_pure_per_key() {
        let generator = generator(5.0);
        let first = generator.generate(at(9, 30), "Quiet");
        let _ = generator.generate(at(9, 31), "Busy");
        let again = generator.generate(at(9, 30), "Quiet");
        assert_eq!(first, again);
        assert!(first.synthetic);
    }

    #[test]
    fn reseeding_changes_draws() {
        let mut generator = generator(5.0);
        let before: Vec<f64> = (0..10)
            .map(|m| generator.generate(at(9, m), "Quiet").load_kw)
            .collect();
        generator.reseed(8);
        let after: Vec<f64> = (0..10)
            .map(|m| generator.generate(at(9, m), "Quiet").load_kw)
            .collect();
        assert_ne!(before, after);
    }

    #[test]
    fn evening_window_multiplies_base_load() {
        let generator = generator(0.0);
        assert_eq!(generator.peak_factor(17), 1.0);
        assert_eq!(generator.peak_factor(18), 1.7);
        assert_eq!(generator.peak_factor(22), 1.7);
        assert_eq!(generator.peak_factor(23), 1.0);
        assert_eq!(generator.generate(at(12, 0), "Quiet").load_kw, 45.0);
        assert_eq!(generator.generate(at(20, 0), "Quiet").load_kw, 76.5);
    }

    #[test]
    fn queue_follows_two_regimes() {
        let generator = generator(0.0);
        for minute in 0..30 {
            let busy = generator.generate(at(10, minute), "Busy");
            assert!((4..=8).contains(&busy.queue_length), "{busy:?}");
            let quiet = generator.generate(at(10, minute), "Quiet");
            assert!(quiet.queue_length <= 2, "{quiet:?}");
        }
    }

    #[test]
    fn derived_fields_follow_their_models() {
        let generator = generator(0.0);
        let off_peak = generator.generate(at(10, 0), "Busy");
        assert_eq!(off_peak.v2g_profit, Some(0.0));
        assert_eq!(off_peak.carbon_saved_kg, Some(round2(90.0 * 0.42)));
        let batteries = off_peak.available_batteries.unwrap();
        assert!((10..=15).contains(&batteries), "busy zone pays the penalty");
        let soh = off_peak.state_of_health_pct.unwrap();
        assert!((97.0..=98.5).contains(&soh));

        let peak = generator.generate(at(19, 0), "Quiet");
        let profit = peak.v2g_profit.unwrap();
        assert!((5.0..=25.0).contains(&profit));
        let risk = peak.fault_risk_pct.unwrap();
        assert!((0.1..=2.5).contains(&risk));
        let green = peak.green_energy_pct.unwrap();
        assert!((35.0..=50.0).contains(&green));
    }

    #[test]
    fn derived_fields_can_be_disabled() {
        let mut config = GeneratorConfig::default();
        config.derived.enabled = false;
        let generator = SyntheticRecordGenerator::new(&zones(), &config).unwrap();
        let record = generator.generate(at(10, 0), "Quiet");
        assert!(record.state_of_health_pct.is_none());
        assert!(record.v2g_profit.is_none());
    }

    #[test]
    fn load_is_not_clamped_to_non_negative() {
        let generator = generator(5.0);
        let negatives = (0..240)
            .map(|m| generator.generate(at(m / 60, m % 60), "Idle"))
            .filter(|record| record.load_kw < 0.0)
            .count();
        assert!(negatives > 0);
    }

    #[test]
    fn rejects_empty_zone_set() {
        let err = SyntheticRecordGenerator::new(&IndexMap::new(), &GeneratorConfig::default())
            .unwrap_err();
        assert!(matches!(err, GeneratorError::NoZones));
    }
}
