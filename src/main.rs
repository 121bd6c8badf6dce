use chrono::{Duration as ChronoDuration, Utc};
use crossbeam_channel::RecvTimeoutError;
use ppg_telemetry::simulator::DeviceSimulator;
use ppg_telemetry::{ChannelId, Config, PipelineWorker, RawPacket, SensorKind, TimeRange};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Device cadence at 50 Hz: one PPG frame (20 samples) every 400 ms,
// one accelerometer frame (25 samples) every 500 ms
const TICK: Duration = Duration::from_millis(100);
const PPG_EVERY_TICKS: u64 = 4;
const ACCEL_EVERY_TICKS: u64 = 5;
const TEMPERATURE_EVERY_TICKS: u64 = 50;
const BATTERY_EVERY_TICKS: u64 = 100;

fn parse_seconds() -> u64 {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == "--seconds")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(10)
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; falling back to defaults", e);
            Config::default()
        }
    };
    let run_for = Duration::from_secs(parse_seconds());

    let (worker, sender) = PipelineWorker::spawn(&config);
    let live = worker.subscribe();

    // Simulated device on its own thread, standing in for the transport
    let should_stop = Arc::new(AtomicBool::new(false));
    let producer_stop = Arc::clone(&should_stop);
    let producer_sender = sender.clone();
    let producer = thread::spawn(move || {
        let mut sim = DeviceSimulator::new(72.0, 97.0, f64::from(config.decoder.ppg_sample_rate_hz));
        let mut tick = 0u64;
        while !producer_stop.load(Ordering::Relaxed) {
            if tick % PPG_EVERY_TICKS == 0 {
                producer_sender.try_send(RawPacket::new(sim.ppg_frame(), ChannelId::Ppg));
            }
            if tick % ACCEL_EVERY_TICKS == 0 {
                producer_sender.try_send(RawPacket::new(sim.accel_frame(), ChannelId::Accelerometer));
            }
            if tick % TEMPERATURE_EVERY_TICKS == 0 {
                producer_sender.try_send(RawPacket::new(sim.temperature_frame(36.4), ChannelId::Temperature));
            }
            if tick % BATTERY_EVERY_TICKS == 0 {
                producer_sender.try_send(RawPacket::new(sim.battery_frame(3_950), ChannelId::Battery));
            }
            tick += 1;
            thread::sleep(TICK);
        }
    });

    let started = Instant::now();
    while started.elapsed() < run_for {
        match live.recv_timeout(Duration::from_millis(250)) {
            Ok(reading) => match reading.kind {
                SensorKind::HeartRate => log::info!(
                    "Heart rate {:.1} BPM (quality {:.2})",
                    reading.value,
                    reading.quality.unwrap_or(0.0)
                ),
                SensorKind::BloodOxygen => log::info!("SpO2 {:.1}%", reading.value),
                SensorKind::Temperature => log::info!("Temperature {:.2} °C", reading.value),
                SensorKind::Battery => log::info!("Battery {:.0}%", reading.value),
                kind => log::debug!("{} = {:.3}", kind, reading.value),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    should_stop.store(true, Ordering::Relaxed);
    if producer.join().is_err() {
        log::error!("Simulator thread panicked");
    }

    let range = TimeRange::ending_at(Utc::now(), ChronoDuration::seconds(run_for.as_secs() as i64 + 1));
    for bucket in worker.aggregate(range, ChronoDuration::seconds(2)) {
        log::info!(
            "{} | {} readings | IR mean {:.0} | movement events {}",
            bucket.timestamp.format("%H:%M:%S"),
            bucket.sample_count,
            bucket.mean(SensorKind::PpgInfrared).unwrap_or(f64::NAN),
            bucket.event_count
        );
    }

    log::info!("Dropped {} packets at the queue", sender.dropped_count());
    sender.disconnect();
    worker.shutdown();
}
