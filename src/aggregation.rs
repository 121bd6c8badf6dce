//! # Aggregation Engine
//!
//! Buckets a reading stream into fixed-width time windows for historical
//! charts. Each bucket carries per-kind mean/min/max, a reading count and a
//! count of movement events. Buckets with no readings are left out.
//!
//! ## Range Semantics
//! The range `[start, end]` is split into `ceil(span / bucket)` windows of
//! `[start + k·bucket, start + (k+1)·bucket)`. A reading stamped exactly at
//! `end` belongs to the final bucket. Readings outside the range are ignored.
//!
//! ## Caching
//! Results are cached in an LRU keyed by the range, the bucket width and a
//! fingerprint of the input (count, first/last timestamp, last value). The
//! fingerprint is coarse on purpose; call `aggregate_uncached` or
//! `invalidate` when the input may have changed in the middle.

use crate::error::AggregationIssue;
use crate::timeseries::{ReadingSliceExt, SensorKind, SensorReading, ValueSliceExt};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub cache_capacity: usize,
    /// Deviation of the movement magnitude from 1 g that counts as an event
    pub movement_event_threshold_g: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 32,
            movement_event_threshold_g: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `span` leading up to `end`
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Self {
        Self {
            start: end - span,
            end,
        }
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBucket {
    /// Bucket midpoint
    pub timestamp: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sample_count: usize,
    pub event_count: usize,
    pub metrics: BTreeMap<SensorKind, MetricSummary>,
}

impl AggregatedBucket {
    pub fn metric(&self, kind: SensorKind) -> Option<&MetricSummary> {
        self.metrics.get(&kind)
    }

    pub fn mean(&self, kind: SensorKind) -> Option<f64> {
        self.metric(kind).map(|m| m.mean)
    }
}

/// Running sums for one kind inside one bucket
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Accumulator {
    fn new(value: f64) -> Self {
        Self {
            sum: value,
            min: value,
            max: value,
            count: 1,
        }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    fn summary(&self) -> MetricSummary {
        MetricSummary {
            mean: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            count: self.count,
        }
    }
}

#[derive(Debug, Default)]
struct BucketAccumulator {
    sample_count: usize,
    event_count: usize,
    metrics: BTreeMap<SensorKind, Accumulator>,
}

/// Trend over ordered bucket averages: mean of the last third minus mean of
/// the first third. Needs at least two values.
pub fn trend(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let third = (values.len() / 3).max(1);
    let head = values[..third].mean()?;
    let tail = values[values.len() - third..].mean()?;
    Some(tail - head)
}

/// Cache key: (range start, range end, bucket width in ns, data fingerprint)
type CacheKey = (DateTime<Utc>, DateTime<Utc>, i64, u64);

pub struct AggregationEngine {
    config: AggregationConfig,
    cache: LruCache<CacheKey, Vec<AggregatedBucket>>,
}

impl AggregationEngine {
    pub fn new(config: AggregationConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            cache: LruCache::new(capacity),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Bucketed statistics over `range`, served from the cache when the input looks unchanged
    pub fn aggregate(
        &mut self,
        readings: &[SensorReading],
        range: TimeRange,
        bucket: Duration,
    ) -> Vec<AggregatedBucket> {
        let key: CacheKey = (
            range.start,
            range.end,
            bucket.num_nanoseconds().unwrap_or(i64::MAX),
            fingerprint(readings),
        );
        if let Some(hit) = self.cache.get(&key) {
            log::trace!("Aggregation cache hit for {} buckets", hit.len());
            return hit.clone();
        }

        let buckets = self.aggregate_uncached(readings, range, bucket);
        self.cache.put(key, buckets.clone());
        buckets
    }

    /// Always recomputes; never touches the cache
    pub fn aggregate_uncached(
        &self,
        readings: &[SensorReading],
        range: TimeRange,
        bucket: Duration,
    ) -> Vec<AggregatedBucket> {
        let span_ns = range.span().num_nanoseconds().unwrap_or(0);
        let bucket_ns = bucket.num_nanoseconds().unwrap_or(0);
        if span_ns <= 0 || bucket_ns <= 0 {
            log::debug!("{}", AggregationIssue::EmptyAggregationRange);
            return Vec::new();
        }

        let bucket_count = ((span_ns + bucket_ns - 1) / bucket_ns) as usize;
        let mut accumulators: BTreeMap<usize, BucketAccumulator> = BTreeMap::new();

        for reading in readings.iter().filter(|r| range.contains(r.timestamp)) {
            let offset_ns = (reading.timestamp - range.start).num_nanoseconds().unwrap_or(0);
            let index = ((offset_ns / bucket_ns) as usize).min(bucket_count - 1);

            let acc = accumulators.entry(index).or_default();
            acc.sample_count += 1;
            if self.is_event(reading) {
                acc.event_count += 1;
            }
            acc.metrics
                .entry(reading.kind)
                .and_modify(|m| m.add(reading.value))
                .or_insert_with(|| Accumulator::new(reading.value));
        }

        accumulators
            .into_iter()
            .map(|(index, acc)| {
                let offset = bucket_ns.saturating_mul(i64::try_from(index).unwrap_or(i64::MAX));
                let start = range.start + Duration::nanoseconds(offset);
                let end = (start + bucket).min(range.end);
                AggregatedBucket {
                    timestamp: start + (end - start) / 2,
                    start,
                    end,
                    sample_count: acc.sample_count,
                    event_count: acc.event_count,
                    metrics: acc
                        .metrics
                        .iter()
                        .map(|(kind, m)| (*kind, m.summary()))
                        .collect(),
                }
            })
            .collect()
    }

    /// Trend of one kind's bucket means, skipping buckets without that kind
    pub fn trend(buckets: &[AggregatedBucket], kind: SensorKind) -> Option<f64> {
        let means: Vec<f64> = buckets.iter().filter_map(|b| b.mean(kind)).collect();
        trend(&means)
    }

    fn is_event(&self, reading: &SensorReading) -> bool {
        reading.kind == SensorKind::Movement
            && (reading.value - 1.0).abs() > self.config.movement_event_threshold_g
    }
}

/// Cheap identity of an input slice: count, time bounds and the last value
fn fingerprint(readings: &[SensorReading]) -> u64 {
    let mut hasher = DefaultHasher::new();
    readings.len().hash(&mut hasher);
    if let Some((first, last)) = readings.min_max_time() {
        first.hash(&mut hasher);
        last.hash(&mut hasher);
    }
    if let Some(reading) = readings.last() {
        reading.value.to_bits().hash(&mut hasher);
        reading.kind.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn engine() -> AggregationEngine {
        AggregationEngine::new(AggregationConfig::default())
    }

    /// One temperature reading every 10 seconds over the hour before `end()`
    fn hour_of_temperatures() -> Vec<SensorReading> {
        (0..360)
            .map(|i| {
                SensorReading::new(
                    SensorKind::Temperature,
                    36.0 + (i % 10) as f64 / 10.0,
                    end() - Duration::minutes(60) + Duration::seconds(10 * i),
                )
            })
            .collect()
    }

    #[test]
    fn test_uniform_hour_into_six_buckets() {
        let readings = hour_of_temperatures();
        let range = TimeRange::ending_at(end(), Duration::minutes(60));

        let buckets = engine().aggregate_uncached(&readings, range, Duration::minutes(10));

        assert_eq!(buckets.len(), 6);
        assert!(buckets.iter().all(|b| b.sample_count == 60));
        assert_eq!(buckets.iter().map(|b| b.sample_count).sum::<usize>(), readings.len());

        let first = &buckets[0];
        assert_eq!(first.timestamp, range.start + Duration::minutes(5));
        let temp = first.metric(SensorKind::Temperature).unwrap();
        assert!((temp.mean - 36.45).abs() < 1e-9);
        assert!((temp.min - 36.0).abs() < 1e-9);
        assert!((temp.max - 36.9).abs() < 1e-9);
    }

    #[test]
    fn test_empty_buckets_omitted() {
        let range = TimeRange::ending_at(end(), Duration::minutes(60));
        let readings = vec![
            SensorReading::new(SensorKind::Battery, 80.0, range.start + Duration::minutes(1)),
            SensorReading::new(SensorKind::Battery, 78.0, range.start + Duration::minutes(55)),
        ];

        let buckets = engine().aggregate_uncached(&readings, range, Duration::minutes(10));

        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.sample_count >= 1));
        assert_eq!(buckets[1].start, range.start + Duration::minutes(50));
    }

    #[test]
    fn test_reading_at_end_goes_to_last_bucket() {
        let range = TimeRange::ending_at(end(), Duration::minutes(30));
        let readings = vec![
            SensorReading::new(SensorKind::Battery, 50.0, end()),
            SensorReading::new(SensorKind::Battery, 50.0, end() + Duration::seconds(1)),
            SensorReading::new(SensorKind::Battery, 50.0, range.start - Duration::seconds(1)),
        ];

        let buckets = engine().aggregate_uncached(&readings, range, Duration::minutes(10));

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].start, range.start + Duration::minutes(20));
        assert_eq!(buckets[0].sample_count, 1);
    }

    #[test]
    fn test_partial_final_bucket_is_clipped() {
        let range = TimeRange::ending_at(end(), Duration::minutes(25));
        let readings = vec![SensorReading::new(
            SensorKind::Temperature,
            36.6,
            end() - Duration::minutes(1),
        )];

        let buckets = engine().aggregate_uncached(&readings, range, Duration::minutes(10));

        assert_eq!(buckets[0].end, end());
        assert_eq!(buckets[0].timestamp, range.start + Duration::minutes(20) + Duration::seconds(150));
    }

    #[test]
    fn test_fine_buckets_over_long_range_stay_in_range() {
        // More buckets than fit in an i32
        let range = TimeRange::ending_at(end(), Duration::days(30));
        let reading_time = end() - Duration::minutes(1);
        let readings = vec![SensorReading::new(SensorKind::Temperature, 36.6, reading_time)];

        let buckets = engine().aggregate_uncached(&readings, range, Duration::milliseconds(1));

        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert!(range.contains(bucket.start));
        assert!(range.contains(bucket.timestamp));
        assert_eq!(bucket.start, reading_time);
        assert_eq!(bucket.end, reading_time + Duration::milliseconds(1));
    }

    #[test]
    fn test_empty_range_returns_nothing() {
        let readings = hour_of_temperatures();
        let e = engine();
        assert!(e
            .aggregate_uncached(&readings, TimeRange::new(end(), end()), Duration::minutes(1))
            .is_empty());
        assert!(e
            .aggregate_uncached(&readings, TimeRange::ending_at(end(), Duration::hours(1)), Duration::zero())
            .is_empty());
    }

    #[test]
    fn test_movement_events_counted() {
        let range = TimeRange::ending_at(end(), Duration::minutes(10));
        let t = range.start + Duration::minutes(1);
        let readings = vec![
            SensorReading::new(SensorKind::Movement, 1.02, t),
            SensorReading::new(SensorKind::Movement, 2.10, t),
            SensorReading::new(SensorKind::Movement, 0.20, t),
            SensorReading::new(SensorKind::AccelX, 3.0, t),
        ];

        let buckets = engine().aggregate_uncached(&readings, range, Duration::minutes(10));

        assert_eq!(buckets[0].event_count, 2);
        assert_eq!(buckets[0].sample_count, 4);
        let movement = buckets[0].metric(SensorKind::Movement).unwrap();
        assert_eq!(movement.count, 3);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let readings = hour_of_temperatures();
        let range = TimeRange::ending_at(end(), Duration::minutes(60));
        let mut e = engine();

        let first = e.aggregate(&readings, range, Duration::minutes(10));
        let second = e.aggregate(&readings, range, Duration::minutes(10));
        let fresh = e.aggregate_uncached(&readings, range, Duration::minutes(10));

        assert_eq!(first, second);
        assert_eq!(first, fresh);
        for (a, b) in first.iter().zip(&fresh) {
            let (ma, mb) = (a.mean(SensorKind::Temperature).unwrap(), b.mean(SensorKind::Temperature).unwrap());
            assert_eq!(ma.to_bits(), mb.to_bits());
        }
    }

    #[test]
    fn test_cache_hit_and_invalidate() {
        let readings = hour_of_temperatures();
        let range = TimeRange::ending_at(end(), Duration::minutes(60));
        let mut e = engine();

        e.aggregate(&readings, range, Duration::minutes(10));
        e.aggregate(&readings, range, Duration::minutes(10));
        assert_eq!(e.cached_results(), 1);

        e.aggregate(&readings, range, Duration::minutes(5));
        assert_eq!(e.cached_results(), 2);

        e.invalidate();
        assert_eq!(e.cached_results(), 0);
    }

    #[test]
    fn test_cache_is_bounded() {
        let config = AggregationConfig {
            cache_capacity: 2,
            ..AggregationConfig::default()
        };
        let mut e = AggregationEngine::new(config);
        let readings = hour_of_temperatures();
        let range = TimeRange::ending_at(end(), Duration::minutes(60));

        for minutes in 1..=5 {
            e.aggregate(&readings, range, Duration::minutes(minutes));
        }
        assert_eq!(e.cached_results(), 2);
    }

    #[test]
    fn test_trend() {
        assert_eq!(trend(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]), Some(2.0));
        assert_eq!(trend(&[5.0, 4.0]), Some(-1.0));
        assert_eq!(trend(&[5.0]), None);
    }

    #[test]
    fn test_trend_over_buckets() {
        let range = TimeRange::ending_at(end(), Duration::minutes(60));
        let readings: Vec<SensorReading> = (0..6)
            .map(|i| {
                SensorReading::new(
                    SensorKind::Temperature,
                    36.0 + i as f64 * 0.1,
                    range.start + Duration::minutes(10 * i + 5),
                )
            })
            .collect();

        let buckets = engine().aggregate_uncached(&readings, range, Duration::minutes(10));
        let rising = AggregationEngine::trend(&buckets, SensorKind::Temperature).unwrap();
        // (36.45 avg of last two) - (36.05 avg of first two)
        assert!((rising - 0.4).abs() < 1e-9);
        assert!(AggregationEngine::trend(&buckets, SensorKind::Battery).is_none());
    }
}
