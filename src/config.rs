//! # Configuration Management Module
//!
//! Persistent settings stored in a platform-appropriate location. Handles
//! loading, saving, validation and defaults for every pipeline stage.
//!
//! ## Sections
//! - `[channels]`: characteristic UUID per channel
//! - `[decoder]`: sample rates, valid PPG range, accelerometer full scale, battery curve
//! - `[throttle]`: minimum interval between live updates
//! - `[heart_rate]`: window, filter cutoffs, peak detection and gating constants
//! - `[spo2]`: ratio-of-ratios window and clamps
//! - `[aggregation]`: result cache size and movement event threshold
//! - `[pipeline]`: queue capacity, history depth, estimation cadence
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ppg-telemetry/config.toml
//! - Linux: ~/.config/ppg-telemetry/config.toml
//! - Windows: %APPDATA%\ppg-telemetry\config.toml
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! overrides.

use crate::aggregation::AggregationConfig;
use crate::channel::ChannelConfig;
use crate::decoder::DecoderConfig;
use crate::error::ConfigError;
use crate::heart_rate::HeartRateConfig;
use crate::pipeline::PipelineConfig;
use crate::spo2::SpO2Config;
use crate::throttle::ThrottleConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channels: ChannelConfig,
    pub decoder: DecoderConfig,
    pub throttle: ThrottleConfig,
    pub heart_rate: HeartRateConfig,
    pub spo2: SpO2Config,
    pub aggregation: AggregationConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ppg-telemetry")
            .join("config.toml")
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, create default
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        };

        let d = &self.decoder;
        if d.ppg_sample_rate_hz == 0 || d.accel_sample_rate_hz == 0 {
            return invalid("decoder.sample_rate_hz", "sample rates must be positive");
        }
        if d.ppg_min_valid >= d.ppg_max_valid {
            return invalid("decoder.ppg_min_valid", "must be below decoder.ppg_max_valid");
        }
        if d.accel_full_scale_g <= 0.0 {
            return invalid("decoder.accel_full_scale_g", "must be positive");
        }
        if d.battery_empty_mv >= d.battery_full_mv {
            return invalid("decoder.battery_empty_mv", "must be below decoder.battery_full_mv");
        }

        let hr = &self.heart_rate;
        if hr.window_size < 3 {
            return invalid("heart_rate.window_size", "needs at least 3 samples");
        }
        if hr.sample_rate_hz <= 0.0 {
            return invalid("heart_rate.sample_rate_hz", "must be positive");
        }
        // Beat intervals are counted in samples, so BPM scales with this rate
        if (hr.sample_rate_hz - f64::from(d.ppg_sample_rate_hz)).abs() > f64::EPSILON {
            return invalid("heart_rate.sample_rate_hz", "must equal decoder.ppg_sample_rate_hz");
        }
        if hr.high_pass_cutoff_hz <= 0.0 || hr.high_pass_cutoff_hz >= hr.low_pass_cutoff_hz {
            return invalid("heart_rate.high_pass_cutoff_hz", "must be positive and below the low-pass cutoff");
        }
        if hr.min_bpm >= hr.max_bpm {
            return invalid("heart_rate.min_bpm", "must be below heart_rate.max_bpm");
        }
        if hr.min_interval_samples > hr.max_interval_samples {
            return invalid("heart_rate.min_interval_samples", "must not exceed heart_rate.max_interval_samples");
        }
        if !(0.0..=1.0).contains(&hr.jump_quality_factor) {
            return invalid("heart_rate.jump_quality_factor", "must be within 0..=1");
        }

        if self.spo2.min_percent > self.spo2.max_percent {
            return invalid("spo2.min_percent", "must not exceed spo2.max_percent");
        }

        let p = &self.pipeline;
        if p.queue_capacity == 0 {
            return invalid("pipeline.queue_capacity", "must be positive");
        }
        if p.history_capacity == 0 {
            return invalid("pipeline.history_capacity", "must be positive");
        }

        Ok(())
    }
}
