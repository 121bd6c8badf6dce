//! # ppg-telemetry
//!
//! Real-time processing core for a wearable PPG/accelerometer sensor:
//! decodes raw characteristic notifications into typed readings and derives
//! heart rate, blood-oxygen and movement metrics from them.
//!
//! ## Modules
//! - `decoder`: wire formats to `SensorReading`s, monotonic sub-sample timestamps
//! - `history`: fixed-capacity ring buffer, one per sensor kind
//! - `throttle`: latest-wins rate limiter for live consumers
//! - `heart_rate` / `spo2`: estimators over rolling PPG windows
//! - `aggregation`: time-bucketed statistics and trend for historical charts
//! - `pipeline`: composition of all stages plus a background worker
//! - `simulator`: synthetic device frames for demos and tests
//!
//! The transport (discovery, pairing, subscriptions) stays outside this
//! crate; it hands over `(bytes, ChannelId, arrival)` through `PacketSender`.

pub mod aggregation;
pub mod channel;
pub mod config;
pub mod decoder;
pub mod error;
pub mod heart_rate;
pub mod history;
pub mod pipeline;
pub mod simulator;
pub mod spo2;
pub mod throttle;
pub mod timeseries;

pub use aggregation::{AggregatedBucket, AggregationEngine, TimeRange};
pub use channel::ChannelId;
pub use config::Config;
pub use decoder::PacketDecoder;
pub use heart_rate::{HeartRateEstimator, HeartRateResult, QualityLevel};
pub use history::CircularBuffer;
pub use pipeline::{PacketSender, PipelineWorker, RawPacket, SensorPipeline};
pub use spo2::{SpO2Estimator, SpO2Result};
pub use throttle::Throttler;
pub use timeseries::{SensorKind, SensorReading};
