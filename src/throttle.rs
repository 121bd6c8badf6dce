//! # Data Throttler
//!
//! Caps the emission rate of a high-frequency stream for a slow consumer.
//! Every input replaces the pending value ("latest wins"); a value is handed
//! back only when `minimum_interval` has passed since the previous emission.
//! `flush` releases whatever is pending so the final value of a stream is
//! never lost.
//!
//! All mutable state sits behind one mutex, so producers on different threads
//! see a consistent last-emission time. `T` only has to be `Send` for the
//! throttler to be shared.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub minimum_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // ~10 updates per second per sensor kind is plenty for a live view
        Self {
            minimum_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleStatistics {
    pub received: u64,
    pub emitted: u64,
    /// Fraction of received values that were coalesced away
    pub drop_rate: f64,
}

#[derive(Debug)]
struct ThrottleState<T> {
    last_emission: Option<Instant>,
    pending: Option<T>,
    received: u64,
    emitted: u64,
}

impl<T> Default for ThrottleState<T> {
    fn default() -> Self {
        Self {
            last_emission: None,
            pending: None,
            received: 0,
            emitted: 0,
        }
    }
}

#[derive(Debug)]
pub struct Throttler<T> {
    minimum_interval: Duration,
    state: Mutex<ThrottleState<T>>,
}

impl<T> Throttler<T> {
    pub fn new(minimum_interval: Duration) -> Self {
        Self {
            minimum_interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(Duration::from_millis(config.minimum_interval_ms))
    }

    pub fn minimum_interval(&self) -> Duration {
        self.minimum_interval
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState<T>> {
        // State stays consistent even if a holder panicked; counters are plain integers
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a value; returns it if the interval has elapsed, otherwise keeps it pending
    pub fn throttle(&self, value: T) -> Option<T> {
        self.throttle_at(value, Instant::now())
    }

    pub fn throttle_at(&self, value: T, now: Instant) -> Option<T> {
        let mut state = self.lock();
        state.received += 1;

        let due = match state.last_emission {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.minimum_interval,
        };

        if due {
            state.last_emission = Some(now);
            state.emitted += 1;
            state.pending = None;
            Some(value)
        } else {
            state.pending = Some(value);
            None
        }
    }

    /// Emit the pending value regardless of the interval
    pub fn flush(&self) -> Option<T> {
        self.flush_at(Instant::now())
    }

    pub fn flush_at(&self, now: Instant) -> Option<T> {
        let mut state = self.lock();
        let value = state.pending.take()?;
        state.last_emission = Some(now);
        state.emitted += 1;
        Some(value)
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn statistics(&self) -> ThrottleStatistics {
        let state = self.lock();
        let drop_rate = if state.received == 0 {
            0.0
        } else {
            1.0 - state.emitted as f64 / state.received as f64
        };
        ThrottleStatistics {
            received: state.received,
            emitted: state.emitted,
            drop_rate: drop_rate.max(0.0),
        }
    }

    /// Back to the initial state: no pending value, no emission history, zero counters
    pub fn reset(&self) {
        *self.lock() = ThrottleState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_value_passes() {
        let throttler = Throttler::new(Duration::from_millis(100));
        assert_eq!(throttler.throttle_at(1, Instant::now()), Some(1));
    }

    #[test]
    fn test_burst_emits_once_then_flush_returns_latest() {
        let throttler = Throttler::new(Duration::from_millis(100));
        let start = Instant::now();

        let emitted: Vec<i32> = (0..50)
            .filter_map(|v| throttler.throttle_at(v, start))
            .collect();

        // Zero elapsed time: ceil(0 / 100ms) + 1 = 1
        assert_eq!(emitted, vec![0]);
        assert!(throttler.has_pending());
        assert_eq!(throttler.flush_at(start), Some(49));
        assert_eq!(throttler.flush_at(start), None);
    }

    #[test]
    fn test_emission_bound_over_time() {
        let interval = Duration::from_millis(100);
        let throttler = Throttler::new(interval);
        let start = Instant::now();

        // 1000 values spread over 1 second, one per millisecond
        let emitted = (0..1000u64)
            .filter(|&i| {
                throttler
                    .throttle_at(i, start + Duration::from_millis(i))
                    .is_some()
            })
            .count();

        let elapsed_ms = 999.0;
        let bound = (elapsed_ms / 100.0_f64).ceil() as usize + 1;
        assert!(emitted <= bound, "{} emissions exceeds bound {}", emitted, bound);
        assert_eq!(emitted, 10);
    }

    #[test]
    fn test_value_after_interval_passes() {
        let throttler = Throttler::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(throttler.throttle_at("a", start).is_some());
        assert!(throttler.throttle_at("b", start + Duration::from_millis(50)).is_none());
        assert_eq!(
            throttler.throttle_at("c", start + Duration::from_millis(100)),
            Some("c")
        );
        // Emitting the latest value clears the pending one
        assert!(!throttler.has_pending());
    }

    #[test]
    fn test_statistics() {
        let throttler = Throttler::new(Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..4 {
            throttler.throttle_at(i, start);
        }

        let stats = throttler.statistics();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.emitted, 1);
        assert!((stats.drop_rate - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_reset_clears_everything() {
        let throttler = Throttler::new(Duration::from_secs(10));
        let start = Instant::now();
        throttler.throttle_at(1, start);
        throttler.throttle_at(2, start);

        throttler.reset();

        assert!(!throttler.has_pending());
        assert_eq!(throttler.statistics().received, 0);
        // No emission history, so the next value passes immediately
        assert_eq!(throttler.throttle_at(3, start), Some(3));
    }

    #[test]
    fn test_concurrent_producers() {
        let throttler = Arc::new(Throttler::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let throttler = Arc::clone(&throttler);
                thread::spawn(move || {
                    (0..250)
                        .filter(|i| throttler.throttle(t * 1000 + i).is_some())
                        .count()
                })
            })
            .collect();

        let emitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(emitted, 1);
        assert_eq!(throttler.statistics().received, 1000);
    }
}
