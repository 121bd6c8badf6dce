//! # Channel Identity
//!
//! Typed identity for the logical data sources the device exposes. Each maps
//! to one notifying characteristic; the transport layer resolves its
//! characteristic UUID to a `ChannelId` once, so nothing downstream compares
//! UUID strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel identifier for routing packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Ppg,
    Accelerometer,
    Temperature,
    Battery,
    /// Characteristic this client does not know; decoded by length alone
    Unknown,
}

impl ChannelId {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelId::Ppg => "ppg",
            ChannelId::Accelerometer => "accelerometer",
            ChannelId::Temperature => "temperature",
            ChannelId::Battery => "battery",
            ChannelId::Unknown => "unknown",
        }
    }

    /// Get all known channel IDs
    pub fn known() -> Vec<ChannelId> {
        vec![
            ChannelId::Ppg,
            ChannelId::Accelerometer,
            ChannelId::Temperature,
            ChannelId::Battery,
        ]
    }

    /// Resolve a characteristic UUID using the configured mapping.
    /// Comparison is case-insensitive; unmatched UUIDs become `Unknown`.
    pub fn from_characteristic(uuid: &str, channels: &ChannelConfig) -> ChannelId {
        let uuid = uuid.trim();
        let table = [
            (channels.ppg.as_str(), ChannelId::Ppg),
            (channels.accelerometer.as_str(), ChannelId::Accelerometer),
            (channels.temperature.as_str(), ChannelId::Temperature),
            (channels.battery.as_str(), ChannelId::Battery),
        ];
        table
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(uuid))
            .map(|(_, id)| *id)
            .unwrap_or(ChannelId::Unknown)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Characteristic UUIDs per channel, overridable in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub ppg: String,
    pub accelerometer: String,
    pub temperature: String,
    pub battery: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ppg: "3A0FF001-98C4-46B2-94AF-1AEE0FD4C48E".to_string(),
            accelerometer: "3A0FF002-98C4-46B2-94AF-1AEE0FD4C48E".to_string(),
            temperature: "3A0FF003-98C4-46B2-94AF-1AEE0FD4C48E".to_string(),
            // Standard Battery Level characteristic
            battery: "00002A19-0000-1000-8000-00805F9B34FB".to_string(),
        }
    }
}
