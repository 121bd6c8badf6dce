//! # Packet Decoder Module
//!
//! Turns raw notification payloads into typed `SensorReading`s.
//!
//! ## Wire Formats (little-endian)
//! ```text
//! 244 bytes  PPG     u32 frame counter + 20 × (u32 red, u32 infrared, u32 green)
//! 154 bytes  Accel   u32 frame counter + 25 × (i16 x, i16 y, i16 z) in milli-g
//! 6-8 bytes  Temp    u32 frame counter + i16 centidegrees Celsius
//! 4 bytes    Battery i32 millivolts
//! ```
//!
//! ## Routing
//! A static table maps `(ChannelId, length range)` to a parser. The channel
//! decides first; length disambiguates channels that multiplex layouts (the
//! PPG characteristic also carries temperature frames on some firmware).
//! Packets from an `Unknown` channel are matched on length alone.
//!
//! ## Timestamps
//! Frames carry batches of samples without per-sample timestamps. Samples are
//! spaced at the configured sample interval and each stream keeps a cursor of
//! the last timestamp it assigned, so a new batch never starts before the
//! previous one ended, even when arrival times jitter or go backwards.
//!
//! ## Failure Handling
//! Nothing here returns an error. Unknown lengths produce an empty batch and a
//! logged `MalformedPacket`; implausible values are dropped one by one with a
//! logged `OutOfRangeValue`.

use crate::channel::ChannelId;
use crate::error::DecodeIssue;
use crate::timeseries::{SensorKind, SensorReading};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

pub const PPG_FRAME_LEN: usize = 244;
pub const PPG_SAMPLES_PER_FRAME: usize = 20;
const PPG_SAMPLE_LEN: usize = 12;

pub const ACCEL_FRAME_LEN: usize = 154;
pub const ACCEL_SAMPLES_PER_FRAME: usize = 25;
const ACCEL_SAMPLE_LEN: usize = 6;

pub const TEMPERATURE_FRAME_LEN: RangeInclusive<usize> = 6..=8;
pub const BATTERY_FRAME_LEN: usize = 4;

const FRAME_HEADER_LEN: usize = 4;

// Nanoseconds in one second
const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub ppg_sample_rate_hz: u32,
    pub accel_sample_rate_hz: u32,
    /// PPG counts at or below this are treated as noise
    pub ppg_min_valid: u32,
    /// PPG counts at or above this are treated as saturation
    pub ppg_max_valid: u32,
    /// Accelerometer full-scale range in g
    pub accel_full_scale_g: f64,
    pub battery_empty_mv: i32,
    pub battery_full_mv: i32,
    /// Stamped on every reading when set
    pub device_id: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ppg_sample_rate_hz: 50,
            accel_sample_rate_hz: 50,
            ppg_min_valid: 1_000,
            ppg_max_valid: 500_000,
            accel_full_scale_g: 16.0,
            battery_empty_mv: 3_000,
            battery_full_mv: 4_200,
            device_id: None,
        }
    }
}

impl DecoderConfig {
    pub fn ppg_sample_interval(&self) -> Duration {
        sample_interval(self.ppg_sample_rate_hz)
    }

    pub fn accel_sample_interval(&self) -> Duration {
        sample_interval(self.accel_sample_rate_hz)
    }
}

fn sample_interval(rate_hz: u32) -> Duration {
    Duration::nanoseconds(NANOS_PER_SECOND / i64::from(rate_hz.max(1)))
}

type ParserFn = fn(&PacketDecoder, &[u8], DateTime<Utc>) -> Vec<SensorReading>;

struct Route {
    channel: ChannelId,
    lengths: RangeInclusive<usize>,
    parser: ParserFn,
}

static ROUTES: [Route; 5] = [
    Route {
        channel: ChannelId::Ppg,
        lengths: PPG_FRAME_LEN..=PPG_FRAME_LEN,
        parser: PacketDecoder::parse_ppg,
    },
    Route {
        channel: ChannelId::Ppg,
        lengths: TEMPERATURE_FRAME_LEN,
        parser: PacketDecoder::parse_temperature,
    },
    Route {
        channel: ChannelId::Accelerometer,
        lengths: ACCEL_FRAME_LEN..=ACCEL_FRAME_LEN,
        parser: PacketDecoder::parse_accel,
    },
    Route {
        channel: ChannelId::Temperature,
        lengths: TEMPERATURE_FRAME_LEN,
        parser: PacketDecoder::parse_temperature,
    },
    Route {
        channel: ChannelId::Battery,
        lengths: BATTERY_FRAME_LEN..=BATTERY_FRAME_LEN,
        parser: PacketDecoder::parse_battery,
    },
];

fn route_for(channel: ChannelId, length: usize) -> Option<&'static Route> {
    let matches_length = |route: &&Route| route.lengths.contains(&length);
    match channel {
        // Best effort: first route whose length fits, no cross-validation possible
        ChannelId::Unknown => ROUTES.iter().find(matches_length),
        known => ROUTES
            .iter()
            .filter(|route| route.channel == known)
            .find(matches_length),
    }
}

/// Last timestamp handed out per batched stream
#[derive(Debug, Default)]
struct TimestampCursors {
    ppg: Option<DateTime<Utc>>,
    accel: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct DecoderStats {
    pub packets: AtomicU64,
    pub malformed: AtomicU64,
    pub dropped_values: AtomicU64,
}

#[derive(Debug)]
pub struct PacketDecoder {
    config: DecoderConfig,
    cursors: Mutex<TimestampCursors>,
    stats: DecoderStats,
}

impl PacketDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            cursors: Mutex::new(TimestampCursors::default()),
            stats: DecoderStats::default(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// Decode a payload that arrived just now
    pub fn decode(&self, bytes: &[u8], channel: ChannelId) -> Vec<SensorReading> {
        self.decode_at(bytes, channel, Utc::now())
    }

    pub fn decode_at(
        &self,
        bytes: &[u8],
        channel: ChannelId,
        arrival: DateTime<Utc>,
    ) -> Vec<SensorReading> {
        self.stats.packets.fetch_add(1, Ordering::Relaxed);

        match route_for(channel, bytes.len()) {
            Some(route) => (route.parser)(self, bytes, arrival),
            None => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "{}",
                    DecodeIssue::MalformedPacket {
                        channel,
                        length: bytes.len(),
                    }
                );
                Vec::new()
            }
        }
    }

    /// Forget all timestamp cursors, e.g. after a disconnect
    pub fn reset(&self) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        *cursors = TimestampCursors::default();
        log::debug!("Decoder timestamp cursors reset");
    }

    /// Calculate the first sample timestamp of a batch
    ///
    /// ## Why
    /// Sensor data arrives in batches without individual timestamps. The batch
    /// is anchored so its last sample lands at arrival time, but it may never
    /// start before one interval after the previous batch's last sample.
    fn calculate_start_time(
        last_assigned: Option<DateTime<Utc>>,
        arrival: DateTime<Utc>,
        sample_count: usize,
        interval: Duration,
    ) -> DateTime<Utc> {
        let span = interval * (sample_count.saturating_sub(1) as i32);
        let anchored = arrival - span;
        match last_assigned {
            Some(last) => anchored.max(last + interval),
            None => anchored,
        }
    }

    /// Reserve `sample_count` timestamps on the stream's cursor and return the first
    fn reserve_timestamps(
        &self,
        select: fn(&mut TimestampCursors) -> &mut Option<DateTime<Utc>>,
        arrival: DateTime<Utc>,
        sample_count: usize,
        interval: Duration,
    ) -> DateTime<Utc> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = select(&mut *cursors);
        let start = Self::calculate_start_time(*cursor, arrival, sample_count, interval);
        *cursor = Some(start + interval * (sample_count.saturating_sub(1) as i32));
        start
    }

    fn reading(&self, kind: SensorKind, value: f64, timestamp: DateTime<Utc>) -> SensorReading {
        SensorReading::new(kind, value, timestamp).with_device(self.config.device_id.as_deref())
    }

    fn drop_value(&self, kind: SensorKind, value: f64) {
        self.stats.dropped_values.fetch_add(1, Ordering::Relaxed);
        log::debug!("{}", DecodeIssue::OutOfRangeValue { kind, value });
    }

    fn ppg_in_range(&self, raw: u32) -> bool {
        raw > self.config.ppg_min_valid && raw < self.config.ppg_max_valid
    }

    fn parse_ppg(&self, bytes: &[u8], arrival: DateTime<Utc>) -> Vec<SensorReading> {
        let interval = self.config.ppg_sample_interval();
        let start = self.reserve_timestamps(
            |c| &mut c.ppg,
            arrival,
            PPG_SAMPLES_PER_FRAME,
            interval,
        );
        log::trace!("PPG frame {}", read_u32(bytes, 0));

        let mut readings = Vec::with_capacity(PPG_SAMPLES_PER_FRAME * 3);
        let samples = bytes[FRAME_HEADER_LEN..].chunks_exact(PPG_SAMPLE_LEN);
        for (i, sample) in samples.enumerate() {
            let t = start + interval * i as i32;
            let channels = [
                (SensorKind::PpgRed, read_u32(sample, 0)),
                (SensorKind::PpgInfrared, read_u32(sample, 4)),
                (SensorKind::PpgGreen, read_u32(sample, 8)),
            ];
            for (kind, raw) in channels {
                if self.ppg_in_range(raw) {
                    readings.push(self.reading(kind, f64::from(raw), t));
                } else {
                    self.drop_value(kind, f64::from(raw));
                }
            }
        }
        readings
    }

    fn parse_accel(&self, bytes: &[u8], arrival: DateTime<Utc>) -> Vec<SensorReading> {
        let interval = self.config.accel_sample_interval();
        let start = self.reserve_timestamps(
            |c| &mut c.accel,
            arrival,
            ACCEL_SAMPLES_PER_FRAME,
            interval,
        );
        log::trace!("Accelerometer frame {}", read_u32(bytes, 0));

        let full_scale = self.config.accel_full_scale_g;
        let mut readings = Vec::with_capacity(ACCEL_SAMPLES_PER_FRAME * 4);
        let samples = bytes[FRAME_HEADER_LEN..].chunks_exact(ACCEL_SAMPLE_LEN);
        for (i, sample) in samples.enumerate() {
            let t = start + interval * i as i32;
            let axes = [
                (SensorKind::AccelX, milli_g_to_g(read_i16(sample, 0))),
                (SensorKind::AccelY, milli_g_to_g(read_i16(sample, 2))),
                (SensorKind::AccelZ, milli_g_to_g(read_i16(sample, 4))),
            ];

            let mut all_valid = true;
            for (kind, g) in axes {
                if g.abs() <= full_scale {
                    readings.push(self.reading(kind, g, t));
                } else {
                    all_valid = false;
                    self.drop_value(kind, g);
                }
            }

            // Magnitude only makes sense with all three axes
            if all_valid {
                let magnitude = axes.iter().map(|(_, g)| g * g).sum::<f64>().sqrt();
                readings.push(self.reading(SensorKind::Movement, magnitude, t));
            }
        }
        readings
    }

    fn parse_temperature(&self, bytes: &[u8], arrival: DateTime<Utc>) -> Vec<SensorReading> {
        let celsius = f64::from(read_i16(bytes, FRAME_HEADER_LEN)) / 100.0;
        vec![self.reading(SensorKind::Temperature, celsius, arrival)]
    }

    fn parse_battery(&self, bytes: &[u8], arrival: DateTime<Utc>) -> Vec<SensorReading> {
        let millivolts = read_i32(bytes, 0);
        let percent = battery_percent(
            millivolts,
            self.config.battery_empty_mv,
            self.config.battery_full_mv,
        );
        vec![self.reading(SensorKind::Battery, percent, arrival)]
    }
}

/// Linear interpolation between empty and full voltage, clamped to 0..=100
pub fn battery_percent(millivolts: i32, empty_mv: i32, full_mv: i32) -> f64 {
    let span = f64::from(full_mv) - f64::from(empty_mv);
    if span <= 0.0 {
        return 0.0;
    }
    let percent = (f64::from(millivolts) - f64::from(empty_mv)) / span * 100.0;
    percent.clamp(0.0, 100.0)
}

fn milli_g_to_g(milli_g: i16) -> f64 {
    f64::from(milli_g) / 1000.0
}

// Callers guarantee length through the routing table
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}
