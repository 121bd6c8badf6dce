//! # Sensor Reading Types
//!
//! The canonical decoded unit (`SensorReading`) plus slice helpers shared by
//! the estimators and the aggregation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physiological or device quantity carried by a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    PpgRed,
    PpgInfrared,
    PpgGreen,
    AccelX,
    AccelY,
    AccelZ,
    /// Accelerometer magnitude in g, derived from the three axes
    Movement,
    Temperature,
    Battery,
    HeartRate,
    BloodOxygen,
}

impl SensorKind {
    pub fn all() -> Vec<SensorKind> {
        vec![
            SensorKind::PpgRed,
            SensorKind::PpgInfrared,
            SensorKind::PpgGreen,
            SensorKind::AccelX,
            SensorKind::AccelY,
            SensorKind::AccelZ,
            SensorKind::Movement,
            SensorKind::Temperature,
            SensorKind::Battery,
            SensorKind::HeartRate,
            SensorKind::BloodOxygen,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::PpgRed => "ppg_red",
            SensorKind::PpgInfrared => "ppg_infrared",
            SensorKind::PpgGreen => "ppg_green",
            SensorKind::AccelX => "accel_x",
            SensorKind::AccelY => "accel_y",
            SensorKind::AccelZ => "accel_z",
            SensorKind::Movement => "movement",
            SensorKind::Temperature => "temperature",
            SensorKind::Battery => "battery",
            SensorKind::HeartRate => "heart_rate",
            SensorKind::BloodOxygen => "blood_oxygen",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded or derived sample. Immutable once built; downstream stages copy it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source_device_id: Option<String>,
    /// Confidence in 0.0..=1.0, set by estimators
    pub quality: Option<f64>,
}

impl SensorReading {
    pub fn new(kind: SensorKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            value,
            timestamp,
            source_device_id: None,
            quality: None,
        }
    }

    pub fn with_device(mut self, device_id: Option<&str>) -> Self {
        self.source_device_id = device_id.map(str::to_owned);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality.clamp(0.0, 1.0));
        self
    }
}

pub trait ReadingSliceExt {
    fn min_max_time(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;
}

impl ReadingSliceExt for [SensorReading] {
    fn min_max_time(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.iter().fold(None, |acc, r| match acc {
            None => Some((r.timestamp, r.timestamp)),
            Some((min, max)) => Some((min.min(r.timestamp), max.max(r.timestamp))),
        })
    }
}

/// Descriptive statistics over plain sample values
pub trait ValueSliceExt {
    fn mean(&self) -> Option<f64>;
    /// Population standard deviation
    fn std_dev(&self) -> Option<f64>;
    fn median(&self) -> Option<f64>;
}

impl ValueSliceExt for [f64] {
    fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.iter().sum::<f64>() / self.len() as f64)
    }

    fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.len() as f64;
        Some(variance.sqrt())
    }

    fn median(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let mut sorted = self.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn reading(kind: SensorKind, value: f64, secs: i64) -> SensorReading {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        SensorReading::new(kind, value, base + Duration::seconds(secs))
    }

    #[test]
    fn test_time_bounds_over_readings() {
        let readings = vec![
            reading(SensorKind::Temperature, 36.5, 10),
            reading(SensorKind::Temperature, 35.9, 2),
            reading(SensorKind::Temperature, 37.1, 5),
        ];

        let (min_t, max_t) = readings.min_max_time().unwrap();
        assert_eq!(max_t - min_t, Duration::seconds(8));
        assert_eq!(min_t, readings[1].timestamp);
    }

    #[test]
    fn test_empty_slice_stats() {
        let empty: Vec<SensorReading> = Vec::new();
        assert!(empty.min_max_time().is_none());

        let values: Vec<f64> = Vec::new();
        assert!(values.mean().is_none());
        assert!(values.std_dev().is_none());
        assert!(values.median().is_none());
    }

    #[test]
    fn test_value_stats() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(values.mean(), Some(5.0));
        assert_eq!(values.std_dev(), Some(2.0));
        assert_eq!(values.median(), Some(4.5));
        assert_eq!([3.0, 1.0, 2.0].median(), Some(2.0));
    }

    #[test]
    fn test_quality_is_clamped() {
        let r = reading(SensorKind::HeartRate, 72.0, 0).with_quality(1.7);
        assert_eq!(r.quality, Some(1.0));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(SensorKind::PpgInfrared.to_string(), "ppg_infrared");
        assert_eq!(SensorKind::all().len(), 11);
    }
}
