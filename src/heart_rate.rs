//! # Heart-Rate Estimator
//!
//! Beats-per-minute from a rolling window of infrared PPG samples.
//!
//! ## Pipeline
//! 1. Validity gate: enough in-range samples and a coefficient of variation
//!    inside the band where a cardiac pulse is plausible
//! 2. Bandpass: first-order high-pass then low-pass IIR stages
//! 3. Adaptive peaks: local maxima above `mean + k·σ` with a refractory distance
//! 4. Intervals: bounded to the physiological range, median outliers removed
//! 5. Quality from interval regularity, then plausibility gating
//!
//! Every failed gate means "no estimate this cycle"; the window keeps sliding
//! and the next call tries again.

use crate::error::EstimateIssue;
use crate::history::CircularBuffer;
use crate::timeseries::ValueSliceExt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    /// Rolling window length in samples
    pub window_size: usize,
    pub sample_rate_hz: f64,
    pub high_pass_cutoff_hz: f64,
    pub low_pass_cutoff_hz: f64,
    /// Minimum fraction of samples that must pass the validity filter
    pub min_valid_fraction: f64,
    pub noise_floor: f64,
    pub saturation_ceiling: f64,
    pub min_variation: f64,
    pub max_variation: f64,
    /// Peak threshold in standard deviations above the mean
    pub peak_threshold_sigma: f64,
    /// Refractory distance between peaks in samples
    pub min_peak_distance: usize,
    pub min_interval_samples: usize,
    pub max_interval_samples: usize,
    /// Intervals further than this fraction from the median are discarded
    pub outlier_tolerance: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Relative change against the previous estimate that counts as a jump
    pub jump_ratio: f64,
    /// Quality multiplier applied to a jump instead of rejecting it
    pub jump_quality_factor: f64,
    pub good_quality: f64,
    pub fair_quality: f64,
    pub min_reliable_quality: f64,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            window_size: 150, // ~3 s at 50 Hz
            sample_rate_hz: 50.0,
            high_pass_cutoff_hz: 0.5,
            low_pass_cutoff_hz: 4.0,
            min_valid_fraction: 0.8,
            noise_floor: 1_000.0,
            saturation_ceiling: 500_000.0,
            min_variation: 0.005,
            max_variation: 0.5,
            peak_threshold_sigma: 0.5,
            min_peak_distance: 15, // caps detection at 200 BPM
            min_interval_samples: 15,
            max_interval_samples: 75,
            outlier_tolerance: 0.3,
            min_bpm: 40.0,
            max_bpm: 180.0,
            jump_ratio: 0.3,
            jump_quality_factor: 0.5,
            good_quality: 0.7,
            fair_quality: 0.4,
            min_reliable_quality: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Good,
    Fair,
    Poor,
}

impl QualityLevel {
    pub fn from_quality(quality: f64, good: f64, fair: f64) -> Self {
        if quality >= good {
            QualityLevel::Good
        } else if quality >= fair {
            QualityLevel::Fair
        } else {
            QualityLevel::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateResult {
    pub bpm: f64,
    pub quality: f64,
    pub quality_level: QualityLevel,
    pub is_reliable: bool,
    pub timestamp: DateTime<Utc>,
}

/// Single-pole high-pass: removes DC offset and baseline wander
pub fn high_pass(signal: &[f64], cutoff_hz: f64, sample_rate_hz: f64) -> Vec<f64> {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let dt = 1.0 / sample_rate_hz;
    let alpha = rc / (rc + dt);

    let mut out = vec![0.0; signal.len()];
    for i in 1..signal.len() {
        out[i] = alpha * (out[i - 1] + signal[i] - signal[i - 1]);
    }
    out
}

/// Single-pole low-pass (exponential moving average)
pub fn low_pass(signal: &[f64], cutoff_hz: f64, sample_rate_hz: f64) -> Vec<f64> {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let dt = 1.0 / sample_rate_hz;
    let alpha = dt / (rc + dt);

    let mut out = signal.to_vec();
    for i in 1..out.len() {
        out[i] = out[i - 1] + alpha * (out[i] - out[i - 1]);
    }
    out
}

/// Local maxima above `mean + sigma·σ`, at least `min_distance` apart.
/// Within the refractory distance the taller peak wins.
pub fn detect_peaks(signal: &[f64], sigma: f64, min_distance: usize) -> Vec<usize> {
    let (Some(mean), Some(std_dev)) = (signal.mean(), signal.std_dev()) else {
        return Vec::new();
    };
    let threshold = mean + sigma * std_dev;

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..signal.len().saturating_sub(1) {
        let is_peak = signal[i] > signal[i - 1] && signal[i] > signal[i + 1] && signal[i] > threshold;
        if !is_peak {
            continue;
        }
        match peaks.last_mut() {
            Some(last) if i - *last < min_distance => {
                if signal[i] > signal[*last] {
                    *last = i;
                }
            }
            _ => peaks.push(i),
        }
    }
    peaks
}

pub struct HeartRateEstimator {
    config: HeartRateConfig,
    window: CircularBuffer<f64>,
    last_bpm: Option<f64>,
    last_quality: Option<f64>,
}

impl HeartRateEstimator {
    pub fn new(config: HeartRateConfig) -> Self {
        Self {
            window: CircularBuffer::new(config.window_size),
            config,
            last_bpm: None,
            last_quality: None,
        }
    }

    pub fn config(&self) -> &HeartRateConfig {
        &self.config
    }

    pub fn last_bpm(&self) -> Option<f64> {
        self.last_bpm
    }

    pub fn last_quality(&self) -> Option<f64> {
        self.last_quality
    }

    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Slide new infrared samples into the window, evicting the oldest
    pub fn add_samples(&mut self, samples: &[f64]) {
        self.window.extend(samples.iter().copied());
    }

    /// Append then estimate
    pub fn process(&mut self, samples: &[f64], now: DateTime<Utc>) -> Option<HeartRateResult> {
        self.add_samples(samples);
        self.estimate(now)
    }

    pub fn estimate(&mut self, now: DateTime<Utc>) -> Option<HeartRateResult> {
        match self.try_estimate(now) {
            Ok(result) => Some(result),
            Err(issue) => {
                log::debug!("No heart rate this cycle: {}", issue);
                None
            }
        }
    }

    /// Same as `estimate` but reports why nothing was produced
    pub fn try_estimate(&mut self, now: DateTime<Utc>) -> Result<HeartRateResult, EstimateIssue> {
        if !self.window.is_full() {
            return Err(EstimateIssue::WindowFilling {
                have: self.window.len(),
                need: self.config.window_size,
            });
        }

        let signal = self.validated_signal()?;
        let filtered = low_pass(
            &high_pass(&signal, self.config.high_pass_cutoff_hz, self.config.sample_rate_hz),
            self.config.low_pass_cutoff_hz,
            self.config.sample_rate_hz,
        );

        let peaks = detect_peaks(
            &filtered,
            self.config.peak_threshold_sigma,
            self.config.min_peak_distance,
        );
        let (mean_interval, interval_std) = self.beat_interval(&peaks)?;

        let bpm = 60.0 * self.config.sample_rate_hz / mean_interval;
        if !(self.config.min_bpm..=self.config.max_bpm).contains(&bpm) {
            return Err(EstimateIssue::ImplausibleRate { bpm });
        }

        let mut quality = (1.0 - interval_std / mean_interval).clamp(0.0, 1.0);
        if let Some(previous) = self.last_bpm {
            let change = (bpm - previous).abs() / previous;
            if change > self.config.jump_ratio {
                log::debug!(
                    "Heart rate jump {:.1} -> {:.1} BPM, quality reduced",
                    previous,
                    bpm
                );
                quality *= self.config.jump_quality_factor;
            }
        }

        self.last_bpm = Some(bpm);
        self.last_quality = Some(quality);

        Ok(HeartRateResult {
            bpm,
            quality,
            quality_level: QualityLevel::from_quality(
                quality,
                self.config.good_quality,
                self.config.fair_quality,
            ),
            is_reliable: quality >= self.config.min_reliable_quality,
            timestamp: now,
        })
    }

    /// Drop buffered samples and the previous estimate, e.g. for a new session
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_bpm = None;
        self.last_quality = None;
    }

    fn is_valid_sample(&self, value: f64) -> bool {
        value != 0.0 && value > self.config.noise_floor && value < self.config.saturation_ceiling
    }

    /// Window with invalid samples held at the previous valid value so spacing is preserved
    fn validated_signal(&self) -> Result<Vec<f64>, EstimateIssue> {
        let raw = self.window.all();
        let valid: Vec<f64> = raw.iter().copied().filter(|&v| self.is_valid_sample(v)).collect();

        let valid_fraction = valid.len() as f64 / raw.len() as f64;
        if valid_fraction < self.config.min_valid_fraction {
            return Err(EstimateIssue::InsufficientSignal { valid_fraction });
        }

        let mean = valid.mean().unwrap_or(0.0);
        let coefficient = valid.std_dev().unwrap_or(0.0) / mean;
        if !(self.config.min_variation..=self.config.max_variation).contains(&coefficient) {
            return Err(EstimateIssue::SignalVariation { coefficient });
        }

        let mut held = valid[0];
        Ok(raw
            .into_iter()
            .map(|v| {
                if self.is_valid_sample(v) {
                    held = v;
                }
                held
            })
            .collect())
    }

    /// Mean and standard deviation of the cleaned beat-to-beat intervals
    fn beat_interval(&self, peaks: &[usize]) -> Result<(f64, f64), EstimateIssue> {
        let bounded: Vec<f64> = peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64)
            .filter(|&d| {
                d >= self.config.min_interval_samples as f64
                    && d <= self.config.max_interval_samples as f64
            })
            .collect();

        let too_few = || EstimateIssue::TooFewBeats { peaks: peaks.len() };
        let median = bounded.median().ok_or_else(too_few)?;
        let tolerance = self.config.outlier_tolerance * median;
        let kept: Vec<f64> = bounded
            .into_iter()
            .filter(|d| (d - median).abs() <= tolerance)
            .collect();

        let mean = kept.mean().ok_or_else(too_few)?;
        let std_dev = kept.std_dev().ok_or_else(too_few)?;
        Ok((mean, std_dev))
    }
}
