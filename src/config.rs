//! Engine configuration.
//!
//! Every field has a default matching the engine's documented constants, so
//! an empty JSON object (or no file at all) yields a working engine.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::global_variables::AMQP_URL;
use crate::rng::DEFAULT_SEED;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle: CycleConfig,
    pub coordination: CoordinationConfig,
    pub analyzer: AnalyzerConfig,
    pub forecaster: ForecasterConfig,
    pub emergency: EmergencyConfig,
    /// Seed for every simulated value the engine draws.
    pub rng_seed: u64,
    /// Broker used by the RabbitMQ adapter binary.
    pub amqp_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle: CycleConfig::default(),
            coordination: CoordinationConfig::default(),
            analyzer: AnalyzerConfig::default(),
            forecaster: ForecasterConfig::default(),
            emergency: EmergencyConfig::default(),
            rng_seed: DEFAULT_SEED,
            amqp_url: AMQP_URL.to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a JSON config.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the controller and forecaster cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cycle = &self.cycle;
        if cycle.green == 0 || cycle.yellow == 0 {
            return Err(invalid("cycle.green and cycle.yellow must be positive"));
        }
        if cycle.min_green == 0 || cycle.min_green > cycle.max_green {
            return Err(invalid(format!(
                "cycle.min_green ({}) must be positive and at most cycle.max_green ({})",
                cycle.min_green, cycle.max_green
            )));
        }
        if cycle.min_red < RED_FLOOR_SECS {
            return Err(invalid(format!(
                "cycle.min_red ({}) must be at least {RED_FLOOR_SECS}",
                cycle.min_red
            )));
        }
        if cycle.red < cycle.min_red {
            return Err(invalid(format!(
                "cycle.red ({}) is below cycle.min_red ({})",
                cycle.red, cycle.min_red
            )));
        }
        if self.forecaster.interval_ms == 0 {
            return Err(invalid("forecaster.interval_ms must be positive"));
        }
        if self.analyzer.history_capacity == 0 || self.forecaster.history_capacity == 0 {
            return Err(invalid("history capacities must be positive"));
        }
        Ok(())
    }
}

/// Red time no configuration may go under, in seconds.
pub const RED_FLOOR_SECS: u32 = 15;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Signal cycle defaults and bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub green: u32,
    pub yellow: u32,
    pub red: u32,
    /// Red never drops below this.
    pub min_red: u32,
    pub min_green: u32,
    pub max_green: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            green: 30,
            yellow: 5,
            red: 25,
            min_red: RED_FLOOR_SECS,
            min_green: 5,
            max_green: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Delay between consecutive intersections of a green wave.
    pub green_wave_offset_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            green_wave_offset_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Samples kept per intersection before the oldest is evicted.
    pub history_capacity: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForecasterConfig {
    pub interval_ms: u64,
    pub history_capacity: usize,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            interval_ms: 900_000,
            history_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Arrivals at or under this ETA get an immediate green.
    pub immediate_green_eta_ms: u64,
    /// Added to the ETA when reporting clearance for a priority arrival.
    pub arrival_clearance_ms: u64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            immediate_green_eta_ms: 10_000,
            arrival_clearance_ms: 15_000,
        }
    }
}
