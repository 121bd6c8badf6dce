//! # Blood-Oxygen Estimator
//!
//! Ratio-of-ratios SpO2 from aligned red and infrared windows:
//!
//! ```text
//! R    = (AC_red / DC_red) / (AC_ir / DC_ir)
//! SpO2 = 110 - 25 * R
//! ```
//!
//! AC is the peak-to-peak swing of a window and DC its mean. The linear
//! calibration is the usual simplified curve; it is good for trends, not for
//! clinical absolutes.

use crate::error::EstimateIssue;
use crate::timeseries::ValueSliceExt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpO2Config {
    /// Samples per channel required before estimating
    pub min_samples: usize,
    pub min_percent: f64,
    pub max_percent: f64,
    /// Infrared perfusion index (%) that maps to full quality
    pub full_quality_perfusion: f64,
}

impl Default for SpO2Config {
    fn default() -> Self {
        Self {
            min_samples: 100,
            min_percent: 70.0,
            max_percent: 100.0,
            full_quality_perfusion: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpO2Result {
    pub percent: f64,
    pub r_ratio: f64,
    /// Infrared AC/DC in percent
    pub perfusion_index: f64,
    pub quality: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn compute_r_ratio(red_ac: f64, red_dc: f64, ir_ac: f64, ir_dc: f64) -> Option<f64> {
    if red_dc <= 0.0 || ir_dc <= 0.0 || ir_ac <= 0.0 {
        return None;
    }
    let r = (red_ac / red_dc) / (ir_ac / ir_dc);
    r.is_finite().then_some(r)
}

/// Peak-to-peak swing and mean of a window
pub fn ac_dc(signal: &[f64]) -> Option<(f64, f64)> {
    let dc = signal.mean()?;
    let (min, max) = signal
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    Some((max - min, dc))
}

#[derive(Debug, Clone)]
pub struct SpO2Estimator {
    config: SpO2Config,
}

impl SpO2Estimator {
    pub fn new(config: SpO2Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpO2Config {
        &self.config
    }

    pub fn estimate(&self, red: &[f64], infrared: &[f64], now: DateTime<Utc>) -> Option<SpO2Result> {
        match self.try_estimate(red, infrared, now) {
            Ok(result) => Some(result),
            Err(issue) => {
                log::debug!("No SpO2 this cycle: {}", issue);
                None
            }
        }
    }

    pub fn try_estimate(
        &self,
        red: &[f64],
        infrared: &[f64],
        now: DateTime<Utc>,
    ) -> Result<SpO2Result, EstimateIssue> {
        // Align on the newest samples of each channel
        let n = red.len().min(infrared.len());
        if n < self.config.min_samples {
            return Err(EstimateIssue::WindowFilling {
                have: n,
                need: self.config.min_samples,
            });
        }
        let red = &red[red.len() - n..];
        let infrared = &infrared[infrared.len() - n..];

        let (red_ac, red_dc) = ac_dc(red).ok_or(EstimateIssue::DegenerateRatio)?;
        let (ir_ac, ir_dc) = ac_dc(infrared).ok_or(EstimateIssue::DegenerateRatio)?;
        let r_ratio =
            compute_r_ratio(red_ac, red_dc, ir_ac, ir_dc).ok_or(EstimateIssue::DegenerateRatio)?;

        let percent = (110.0 - 25.0 * r_ratio).clamp(self.config.min_percent, self.config.max_percent);
        let perfusion_index = ir_ac / ir_dc * 100.0;
        let quality = (perfusion_index / self.config.full_quality_perfusion).clamp(0.0, 1.0);

        Ok(SpO2Result {
            percent,
            r_ratio,
            perfusion_index,
            quality,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::synthetic_infrared;

    #[test]
    fn test_equal_modulation_gives_85_percent() {
        let r = compute_r_ratio(0.02, 1.0, 0.02, 1.0).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert!((110.0 - 25.0 * r - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_dc_protection() {
        assert!(compute_r_ratio(0.02, 0.0, 0.02, 1.0).is_none());
        assert!(compute_r_ratio(0.02, 1.0, 0.0, 1.0).is_none());
    }

    #[test]
    fn test_estimate_from_synthetic_channels() {
        // IR depth 2%, red depth 0.96% => R = 0.48 => 98%
        let infrared = synthetic_infrared(75.0, 50.0, 150, 150_000.0, 3_000.0);
        let red = synthetic_infrared(75.0, 50.0, 150, 120_000.0, 1_152.0);

        let result = SpO2Estimator::new(SpO2Config::default())
            .estimate(&red, &infrared, Utc::now())
            .expect("estimate");
        assert!((result.percent - 98.0).abs() < 0.5, "spo2 {}", result.percent);
        assert!(result.quality > 0.9);
    }

    #[test]
    fn test_clamped_to_floor() {
        let infrared = synthetic_infrared(75.0, 50.0, 150, 150_000.0, 300.0);
        let red = synthetic_infrared(75.0, 50.0, 150, 120_000.0, 6_000.0);

        let result = SpO2Estimator::new(SpO2Config::default())
            .estimate(&red, &infrared, Utc::now())
            .unwrap();
        assert_eq!(result.percent, 70.0);
    }

    #[test]
    fn test_short_window_rejected() {
        let est = SpO2Estimator::new(SpO2Config::default());
        let short = vec![100_000.0; 20];
        assert!(matches!(
            est.try_estimate(&short, &short, Utc::now()),
            Err(EstimateIssue::WindowFilling { have: 20, need: 100 })
        ));
    }

    #[test]
    fn test_flat_infrared_is_degenerate() {
        let est = SpO2Estimator::new(SpO2Config::default());
        let flat = vec![100_000.0; 120];
        let red = synthetic_infrared(75.0, 50.0, 120, 120_000.0, 1_000.0);
        assert_eq!(
            est.try_estimate(&red, &flat, Utc::now()),
            Err(EstimateIssue::DegenerateRatio)
        );
    }
}
