//! # Sensor Pipeline Module
//!
//! Wires the decoder, history buffers, estimators, throttlers and aggregation
//! engine into one owner, and runs it off the transport thread.
//!
//! ## Architecture
//! - **SensorPipeline**: owns every stage; single-threaded, driven through `&mut self`
//! - **PipelineWorker**: background thread that owns the pipeline behind a mutex
//!   and drains a bounded packet queue
//! - **PacketSender**: handle for the transport side; never blocks, drops the
//!   newest packet when the queue is full
//!
//! ## Data Flow
//! ```text
//! transport ──try_send──▶ [bounded queue] ──▶ worker ──▶ decoder
//!                                                         │
//!                    ┌────────────────────────────────────┼───────────────┐
//!                    ▼                                    ▼               ▼
//!            per-kind throttlers ──▶ subscribers   history buffers   IR window
//!                                                         │               │
//!                                                  aggregate()   estimate_heart_rate()
//! ```
//!
//! ## Disconnects
//! `reset` clears every stage: decoder cursors, histories, estimator windows,
//! throttlers and the aggregation cache. Nothing from a previous connection
//! leaks into the next one.

use crate::aggregation::{AggregatedBucket, AggregationEngine, TimeRange};
use crate::channel::ChannelId;
use crate::config::Config;
use crate::decoder::PacketDecoder;
use crate::heart_rate::{HeartRateEstimator, HeartRateResult};
use crate::history::CircularBuffer;
use crate::spo2::{SpO2Estimator, SpO2Result};
use crate::throttle::Throttler;
use crate::timeseries::{SensorKind, SensorReading};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

// Longest the transport thread waits for queue space when signalling a disconnect
const DISCONNECT_SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Packets buffered between transport and worker
    pub queue_capacity: usize,
    /// Readings retained per sensor kind
    pub history_capacity: usize,
    /// Readings buffered per subscriber before new ones are dropped
    pub subscriber_capacity: usize,
    /// Minimum time between estimation runs on the worker
    pub estimate_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            history_capacity: 15_000, // 5 minutes at 50 Hz
            subscriber_capacity: 1_024,
            estimate_interval_ms: 500,
        }
    }
}

/// One notification as delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub bytes: Vec<u8>,
    pub channel: ChannelId,
    pub arrival: DateTime<Utc>,
}

impl RawPacket {
    pub fn new(bytes: Vec<u8>, channel: ChannelId) -> Self {
        Self {
            bytes,
            channel,
            arrival: Utc::now(),
        }
    }
}

pub struct SensorPipeline {
    decoder: PacketDecoder,
    histories: HashMap<SensorKind, CircularBuffer<SensorReading>>,
    heart_rate: HeartRateEstimator,
    spo2: SpO2Estimator,
    aggregation: AggregationEngine,
    throttlers: HashMap<SensorKind, Throttler<SensorReading>>,
    subscribers: Vec<Sender<SensorReading>>,
    subscriber_capacity: usize,
    device_id: Option<String>,
}

impl SensorPipeline {
    pub fn new(config: &Config) -> Self {
        let kinds = SensorKind::all();
        Self {
            decoder: PacketDecoder::new(config.decoder.clone()),
            histories: kinds
                .iter()
                .map(|&k| (k, CircularBuffer::new(config.pipeline.history_capacity)))
                .collect(),
            heart_rate: HeartRateEstimator::new(config.heart_rate.clone()),
            spo2: SpO2Estimator::new(config.spo2.clone()),
            aggregation: AggregationEngine::new(config.aggregation.clone()),
            throttlers: kinds
                .iter()
                .map(|&k| (k, Throttler::from_config(&config.throttle)))
                .collect(),
            subscribers: Vec::new(),
            subscriber_capacity: config.pipeline.subscriber_capacity.max(1),
            device_id: config.decoder.device_id.clone(),
        }
    }

    pub fn decoder(&self) -> &PacketDecoder {
        &self.decoder
    }

    /// Throttled live readings. Slow subscribers lose new readings rather than block ingest.
    pub fn subscribe(&mut self) -> Receiver<SensorReading> {
        let (tx, rx) = bounded(self.subscriber_capacity);
        self.subscribers.push(tx);
        rx
    }

    /// Decode a packet and distribute its readings; returns how many were decoded
    pub fn ingest(&mut self, packet: &RawPacket) -> usize {
        let readings = self
            .decoder
            .decode_at(&packet.bytes, packet.channel, packet.arrival);

        let infrared: Vec<f64> = readings
            .iter()
            .filter(|r| r.kind == SensorKind::PpgInfrared)
            .map(|r| r.value)
            .collect();
        self.heart_rate.add_samples(&infrared);

        let count = readings.len();
        for reading in readings {
            self.record(reading);
        }
        count
    }

    /// Store a reading in its history and offer it to the live path
    fn record(&mut self, reading: SensorReading) {
        if let Some(history) = self.histories.get_mut(&reading.kind) {
            history.append(reading.clone());
        }
        let emitted = self
            .throttlers
            .get(&reading.kind)
            .and_then(|t| t.throttle(reading));
        if let Some(reading) = emitted {
            self.publish(reading);
        }
    }

    fn publish(&mut self, reading: SensorReading) {
        self.subscribers.retain(|tx| match tx.try_send(reading.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Subscriber queue full, dropping {} reading", reading.kind);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Subscriber went away");
                false
            }
        });
    }

    /// Push out anything the throttlers are still holding, e.g. at end of stream
    pub fn flush(&mut self) {
        let pending: Vec<SensorReading> = self
            .throttlers
            .values()
            .filter_map(|t| t.flush())
            .collect();
        for reading in pending {
            self.publish(reading);
        }
    }

    pub fn latest(&self, kind: SensorKind) -> Option<SensorReading> {
        self.histories.get(&kind).and_then(|h| h.last().cloned())
    }

    /// Retained readings of one kind, oldest first
    pub fn history(&self, kind: SensorKind) -> Vec<SensorReading> {
        self.histories.get(&kind).map(|h| h.all()).unwrap_or_default()
    }

    /// Every retained reading across kinds
    pub fn all_readings(&self) -> Vec<SensorReading> {
        let mut kinds: Vec<&SensorKind> = self.histories.keys().collect();
        kinds.sort();
        kinds
            .into_iter()
            .filter_map(|k| self.histories.get(k))
            .flat_map(|h| h.iter().cloned())
            .collect()
    }

    pub fn aggregate(&mut self, range: TimeRange, bucket: Duration) -> Vec<AggregatedBucket> {
        let readings = self.all_readings();
        self.aggregation.aggregate(&readings, range, bucket)
    }

    pub fn aggregate_uncached(&self, range: TimeRange, bucket: Duration) -> Vec<AggregatedBucket> {
        self.aggregation
            .aggregate_uncached(&self.all_readings(), range, bucket)
    }

    /// Run the heart-rate estimator; a result is recorded as a `HeartRate` reading
    pub fn estimate_heart_rate(&mut self, now: DateTime<Utc>) -> Option<HeartRateResult> {
        let result = self.heart_rate.estimate(now)?;
        let reading = SensorReading::new(SensorKind::HeartRate, result.bpm, result.timestamp)
            .with_device(self.device_id.as_deref())
            .with_quality(result.quality);
        self.record(reading);
        Some(result)
    }

    /// Ratio-of-ratios SpO2 over the newest aligned red/infrared window
    pub fn estimate_blood_oxygen(&mut self, now: DateTime<Utc>) -> Option<SpO2Result> {
        let window = self.heart_rate.config().window_size;
        let values = |kind: SensorKind| -> Vec<f64> {
            self.histories
                .get(&kind)
                .map(|h| h.last_n(window).into_iter().map(|r| r.value).collect())
                .unwrap_or_default()
        };
        let red = values(SensorKind::PpgRed);
        let infrared = values(SensorKind::PpgInfrared);

        let result = self.spo2.estimate(&red, &infrared, now)?;
        let reading = SensorReading::new(SensorKind::BloodOxygen, result.percent, result.timestamp)
            .with_device(self.device_id.as_deref())
            .with_quality(result.quality);
        self.record(reading);
        Some(result)
    }

    /// Clear all per-connection state. Subscribers stay attached.
    pub fn reset(&mut self) {
        self.decoder.reset();
        for history in self.histories.values_mut() {
            history.clear();
        }
        self.heart_rate.reset();
        for throttler in self.throttlers.values() {
            throttler.reset();
        }
        self.aggregation.invalidate();
        log::info!("Pipeline reset");
    }
}

/// Commands sent from the transport side to the worker thread
#[derive(Debug)]
enum PipelineCommand {
    Packet(RawPacket),
    Disconnect,
    Shutdown,
}

/// Transport-side handle. Cloneable; every clone feeds the same worker.
#[derive(Debug, Clone)]
pub struct PacketSender {
    sender: Sender<PipelineCommand>,
    dropped: Arc<AtomicU64>,
}

impl PacketSender {
    /// Queue a packet without blocking. Returns false if it was dropped.
    pub fn try_send(&self, packet: RawPacket) -> bool {
        match self.sender.try_send(PipelineCommand::Packet(packet)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Pipeline queue full, dropped packet ({} total)", dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Tell the worker the device went away; its state is reset in order with queued packets.
    /// Waits briefly for queue space, then gives up and returns false.
    pub fn disconnect(&self) -> bool {
        match self
            .sender
            .send_timeout(PipelineCommand::Disconnect, DISCONNECT_SEND_TIMEOUT)
        {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                log::warn!(
                    "Pipeline queue still full after {:?}, disconnect not delivered",
                    DISCONNECT_SEND_TIMEOUT
                );
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Runs a `SensorPipeline` on a background thread
pub struct PipelineWorker {
    pipeline: Arc<Mutex<SensorPipeline>>,
    command_tx: Sender<PipelineCommand>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    /// Spawn the worker; returns it with the transport-side sender
    pub fn spawn(config: &Config) -> (Self, PacketSender) {
        let (command_tx, command_rx) = bounded(config.pipeline.queue_capacity.max(1));
        let pipeline = Arc::new(Mutex::new(SensorPipeline::new(config)));
        let cadence = std::time::Duration::from_millis(config.pipeline.estimate_interval_ms);

        let worker_pipeline = Arc::clone(&pipeline);
        let handle = thread::spawn(move || {
            Self::worker_loop(command_rx, worker_pipeline, cadence);
        });

        let sender = PacketSender {
            sender: command_tx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let worker = PipelineWorker {
            pipeline,
            command_tx,
            handle: Some(handle),
        };
        (worker, sender)
    }

    fn lock(pipeline: &Mutex<SensorPipeline>) -> MutexGuard<'_, SensorPipeline> {
        pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker loop: drain packets, estimate at the configured cadence
    fn worker_loop(
        command_rx: Receiver<PipelineCommand>,
        pipeline: Arc<Mutex<SensorPipeline>>,
        cadence: std::time::Duration,
    ) {
        let mut last_estimate = Instant::now();

        loop {
            match command_rx.recv_timeout(cadence) {
                Ok(PipelineCommand::Packet(packet)) => {
                    Self::lock(&pipeline).ingest(&packet);
                }
                Ok(PipelineCommand::Disconnect) => {
                    log::info!("Pipeline worker: device disconnected");
                    let mut pipeline = Self::lock(&pipeline);
                    pipeline.flush();
                    pipeline.reset();
                }
                Ok(PipelineCommand::Shutdown) => {
                    log::info!("Pipeline worker: shutdown requested");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Pipeline worker: command channel closed");
                    break;
                }
            }

            if last_estimate.elapsed() >= cadence {
                last_estimate = Instant::now();
                let now = Utc::now();
                let mut pipeline = Self::lock(&pipeline);
                if let Some(hr) = pipeline.estimate_heart_rate(now) {
                    log::debug!("Heart rate {:.1} BPM (quality {:.2})", hr.bpm, hr.quality);
                }
                pipeline.estimate_blood_oxygen(now);
            }
        }

        Self::lock(&pipeline).flush();
        log::info!("Pipeline worker stopped");
    }

    pub fn subscribe(&self) -> Receiver<SensorReading> {
        Self::lock(&self.pipeline).subscribe()
    }

    pub fn latest(&self, kind: SensorKind) -> Option<SensorReading> {
        Self::lock(&self.pipeline).latest(kind)
    }

    pub fn aggregate(&self, range: TimeRange, bucket: Duration) -> Vec<AggregatedBucket> {
        Self::lock(&self.pipeline).aggregate(range, bucket)
    }

    /// Run an estimate now, outside the worker's own cadence
    pub fn estimate_heart_rate(&self) -> Option<HeartRateResult> {
        Self::lock(&self.pipeline).estimate_heart_rate(Utc::now())
    }

    /// Stop the worker after it has drained the packets queued so far
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.command_tx.send(PipelineCommand::Shutdown);
            if handle.join().is_err() {
                log::error!("Pipeline worker panicked");
            }
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
