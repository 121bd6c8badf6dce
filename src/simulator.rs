//! # Device Simulator
//!
//! Synthesises well-formed device frames so the pipeline can run without
//! hardware. PPG channels carry a sinusoidal pulse at a chosen rate on top of
//! a DC baseline, with red modulation scaled so the ratio-of-ratios lands on
//! a chosen SpO2. Frame counters increment per frame like the firmware's.

use crate::decoder::{
    ACCEL_FRAME_LEN, ACCEL_SAMPLES_PER_FRAME, PPG_FRAME_LEN, PPG_SAMPLES_PER_FRAME,
};
use std::f64::consts::PI;

const INFRARED_DC: f64 = 150_000.0;
const RED_DC: f64 = 120_000.0;
const GREEN_DC: f64 = 90_000.0;
/// AC/DC modulation depth of the infrared channel
const INFRARED_MODULATION: f64 = 0.02;

/// Encode a PPG frame; missing samples are zero-filled, extras ignored
pub fn encode_ppg_frame(counter: u32, samples: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(PPG_FRAME_LEN);
    bytes.extend_from_slice(&counter.to_le_bytes());
    for &(red, infrared, green) in samples.iter().take(PPG_SAMPLES_PER_FRAME) {
        bytes.extend_from_slice(&red.to_le_bytes());
        bytes.extend_from_slice(&infrared.to_le_bytes());
        bytes.extend_from_slice(&green.to_le_bytes());
    }
    bytes.resize(PPG_FRAME_LEN, 0);
    bytes
}

/// Encode an accelerometer frame from milli-g triples
pub fn encode_accel_frame(counter: u32, samples: &[(i16, i16, i16)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ACCEL_FRAME_LEN);
    bytes.extend_from_slice(&counter.to_le_bytes());
    for &(x, y, z) in samples.iter().take(ACCEL_SAMPLES_PER_FRAME) {
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&z.to_le_bytes());
    }
    bytes.resize(ACCEL_FRAME_LEN, 0);
    bytes
}

pub fn encode_temperature_frame(counter: u32, celsius: f64) -> Vec<u8> {
    let centidegrees = (celsius * 100.0).round() as i16;
    let mut bytes = counter.to_le_bytes().to_vec();
    bytes.extend_from_slice(&centidegrees.to_le_bytes());
    bytes
}

pub fn encode_battery_frame(millivolts: i32) -> Vec<u8> {
    millivolts.to_le_bytes().to_vec()
}

/// Infrared PPG waveform: `dc + amplitude * sin(2π · bpm/60 · t)`
pub fn synthetic_infrared(bpm: f64, sample_rate_hz: f64, count: usize, dc: f64, amplitude: f64) -> Vec<f64> {
    let freq = bpm / 60.0;
    (0..count)
        .map(|i| dc + amplitude * (2.0 * PI * freq * i as f64 / sample_rate_hz).sin())
        .collect()
}

#[derive(Debug, Clone)]
pub struct DeviceSimulator {
    bpm: f64,
    spo2: f64,
    sample_rate_hz: f64,
    ppg_sample_index: u64,
    accel_sample_index: u64,
    ppg_counter: u32,
    accel_counter: u32,
    aux_counter: u32,
}

impl DeviceSimulator {
    pub fn new(bpm: f64, spo2: f64, sample_rate_hz: f64) -> Self {
        Self {
            bpm,
            spo2,
            sample_rate_hz,
            ppg_sample_index: 0,
            accel_sample_index: 0,
            ppg_counter: 0,
            accel_counter: 0,
            aux_counter: 0,
        }
    }

    /// Next PPG frame, continuing the waveform phase from the previous one
    pub fn ppg_frame(&mut self) -> Vec<u8> {
        // SpO2 = 110 - 25R  =>  R = (110 - SpO2) / 25
        let ratio = (110.0 - self.spo2.clamp(0.0, 100.0)) / 25.0;
        let ir_amplitude = INFRARED_DC * INFRARED_MODULATION;
        let red_amplitude = RED_DC * INFRARED_MODULATION * ratio;
        let freq = self.bpm / 60.0;

        let samples: Vec<(u32, u32, u32)> = (0..PPG_SAMPLES_PER_FRAME)
            .map(|_| {
                let t = self.ppg_sample_index as f64 / self.sample_rate_hz;
                self.ppg_sample_index += 1;
                let pulse = (2.0 * PI * freq * t).sin();
                (
                    (RED_DC + red_amplitude * pulse) as u32,
                    (INFRARED_DC + ir_amplitude * pulse) as u32,
                    (GREEN_DC + 0.5 * ir_amplitude * pulse) as u32,
                )
            })
            .collect();

        self.ppg_counter = self.ppg_counter.wrapping_add(1);
        encode_ppg_frame(self.ppg_counter, &samples)
    }

    /// Next accelerometer frame: device at rest with a slow sway
    pub fn accel_frame(&mut self) -> Vec<u8> {
        let samples: Vec<(i16, i16, i16)> = (0..ACCEL_SAMPLES_PER_FRAME)
            .map(|_| {
                let t = self.accel_sample_index as f64 / self.sample_rate_hz;
                self.accel_sample_index += 1;
                let sway = (2.0 * PI * 0.2 * t).sin();
                ((sway * 50.0) as i16, (sway * 30.0) as i16, 1000)
            })
            .collect();

        self.accel_counter = self.accel_counter.wrapping_add(1);
        encode_accel_frame(self.accel_counter, &samples)
    }

    pub fn temperature_frame(&mut self, celsius: f64) -> Vec<u8> {
        self.aux_counter = self.aux_counter.wrapping_add(1);
        encode_temperature_frame(self.aux_counter, celsius)
    }

    pub fn battery_frame(&self, millivolts: i32) -> Vec<u8> {
        encode_battery_frame(millivolts)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.bpm, self.spo2, self.sample_rate_hz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TEMPERATURE_FRAME_LEN;

    #[test]
    fn test_frame_lengths() {
        let mut sim = DeviceSimulator::new(75.0, 98.0, 50.0);
        assert_eq!(sim.ppg_frame().len(), PPG_FRAME_LEN);
        assert_eq!(sim.accel_frame().len(), ACCEL_FRAME_LEN);
        assert!(TEMPERATURE_FRAME_LEN.contains(&sim.temperature_frame(36.6).len()));
        assert_eq!(sim.battery_frame(3_900).len(), 4);
    }

    #[test]
    fn test_frame_counter_increments() {
        let mut sim = DeviceSimulator::new(75.0, 98.0, 50.0);
        let first = sim.ppg_frame();
        let second = sim.ppg_frame();
        assert_eq!(u32::from_le_bytes([first[0], first[1], first[2], first[3]]), 1);
        assert_eq!(u32::from_le_bytes([second[0], second[1], second[2], second[3]]), 2);
    }

    #[test]
    fn test_short_sample_list_is_padded() {
        let bytes = encode_ppg_frame(1, &[(1, 2, 3)]);
        assert_eq!(bytes.len(), PPG_FRAME_LEN);
        assert!(bytes[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_synthetic_infrared_shape() {
        let signal = synthetic_infrared(60.0, 50.0, 50, 1_000.0, 10.0);
        assert_eq!(signal.len(), 50);
        assert_eq!(signal[0], 1_000.0);
        // Quarter period at 1 Hz is sample 12.5; neighbours sit near the crest
        assert!(signal[12] > 1_009.0 && signal[13] > 1_009.0);
    }
}
