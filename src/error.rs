//! # Error Types Module
//!
//! Centralized error and diagnostic types for the telemetry core.
//!
//! ## Error Types
//! - `DecodeIssue`: Packet-level problems found while decoding (non-fatal)
//! - `EstimateIssue`: Reasons a heart-rate or SpO2 estimate was not produced (non-fatal)
//! - `AggregationIssue`: Aggregation requests that cannot yield buckets (non-fatal)
//! - `ConfigError`: Configuration file I/O, parsing and validation errors
//!
//! ## Usage Examples
//! ```rust,ignore
//! // Streaming components log diagnostics and return an empty result
//! log::warn!("{}", DecodeIssue::MalformedPacket { channel, length });
//!
//! // Config module returns ConfigError
//! pub fn load() -> Result<Config, ConfigError> { ... }
//! ```
//!
//! ## Why Two Kinds
//! A continuous sensor stream has to survive transient garbage, so nothing in
//! the decode/estimate/aggregate path is a hard error. Those conditions are
//! diagnostics that get logged, while absence of output (`None`, empty `Vec`)
//! is what the caller sees. Only configuration handling returns `Result`.

use crate::channel::ChannelId;
use crate::timeseries::SensorKind;
use std::fmt;

/// Non-fatal problems found while decoding a raw packet
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeIssue {
    /// Byte length matches no known layout for the channel
    MalformedPacket { channel: ChannelId, length: usize },
    /// A single decoded value fell outside its valid range and was dropped
    OutOfRangeValue { kind: SensorKind, value: f64 },
}

impl fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeIssue::MalformedPacket { channel, length } => {
                write!(f, "Malformed packet on {} channel: {} bytes matches no known format", channel, length)
            }
            DecodeIssue::OutOfRangeValue { kind, value } => {
                write!(f, "Out of range {} value {} dropped", kind, value)
            }
        }
    }
}

impl std::error::Error for DecodeIssue {}

/// Reasons an estimation cycle produced no result
#[derive(Debug, Clone, PartialEq)]
pub enum EstimateIssue {
    /// Rolling window has not filled yet
    WindowFilling { have: usize, need: usize },
    /// Too few samples passed the validity filter
    InsufficientSignal { valid_fraction: f64 },
    /// Coefficient of variation outside the accepted band
    SignalVariation { coefficient: f64 },
    /// Not enough peaks or intervals to compute a rate
    TooFewBeats { peaks: usize },
    /// Final rate fell outside the physiological range
    ImplausibleRate { bpm: f64 },
    /// Red and infrared windows are unusable for a ratio-of-ratios estimate
    DegenerateRatio,
}

impl fmt::Display for EstimateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimateIssue::WindowFilling { have, need } => {
                write!(f, "Signal window filling: {}/{} samples", have, need)
            }
            EstimateIssue::InsufficientSignal { valid_fraction } => {
                write!(f, "Insufficient signal: only {:.0}% of samples valid", valid_fraction * 100.0)
            }
            EstimateIssue::SignalVariation { coefficient } => {
                write!(f, "Signal variation {:.4} outside accepted band", coefficient)
            }
            EstimateIssue::TooFewBeats { peaks } => {
                write!(f, "Too few beats detected: {} peaks", peaks)
            }
            EstimateIssue::ImplausibleRate { bpm } => {
                write!(f, "Implausible heart rate {:.1} BPM rejected", bpm)
            }
            EstimateIssue::DegenerateRatio => {
                write!(f, "Red/infrared ratio could not be computed")
            }
        }
    }
}

impl std::error::Error for EstimateIssue {}

/// Aggregation requests that cannot produce any bucket
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationIssue {
    /// Range is empty or the bucket width is not positive
    EmptyAggregationRange,
}

impl fmt::Display for AggregationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationIssue::EmptyAggregationRange => {
                write!(f, "Aggregation range is empty or bucket width is not positive")
            }
        }
    }
}

impl std::error::Error for AggregationIssue {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// A setting holds a value the pipeline cannot run with
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid config value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_packet_display() {
        let issue = DecodeIssue::MalformedPacket {
            channel: ChannelId::Ppg,
            length: 17,
        };
        let msg = issue.to_string();
        assert!(msg.contains("17 bytes"));
        assert!(msg.contains("ppg"));
    }

    #[test]
    fn test_estimate_issue_display() {
        let issue = EstimateIssue::InsufficientSignal { valid_fraction: 0.5 };
        assert!(issue.to_string().contains("50%"));
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());

        let err = ConfigError::InvalidValue {
            field: "throttle.minimum_interval_ms",
            reason: "must be positive".to_string(),
        };
        assert!(err.source().is_none());
        assert!(err.to_string().contains("throttle.minimum_interval_ms"));
    }
}
