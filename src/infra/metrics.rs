//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations so the edge context never contends
//! with the reporter. Reporting swaps the periodic counters to zero.
//!
//! All atomics here are Relaxed statistical counters. Nothing in the pipeline
//! reads them to make a decision.

use crate::domain::types::{SensorId, ViolationStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Edges seen on S1 (monotonic)
    edges_s1_total: AtomicU64,
    /// Edges seen on S2 (monotonic)
    edges_s2_total: AtomicU64,
    /// S2 edges outside a passage (monotonic)
    edges_out_of_sequence: AtomicU64,
    /// S1 edges inside the debounce window (monotonic)
    edges_debounced: AtomicU64,
    /// Passages pushed onto the queue (monotonic)
    passages_completed: AtomicU64,
    /// Passages dropped on a full queue (monotonic)
    passages_dropped: AtomicU64,
    /// Passages the classifier refused (monotonic)
    passages_rejected: AtomicU64,
    status_normal: AtomicU64,
    status_warning: AtomicU64,
    status_infraction: AtomicU64,
    captures_requested: AtomicU64,
    captures_busy: AtomicU64,
    captures_succeeded: AtomicU64,
    captures_failed: AtomicU64,
    display_publishes: AtomicU64,
    /// Passages processed since last report (reset on report)
    processed_since_report: AtomicU64,
    /// Control-loop processing latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    /// Current passage queue depth (point-in-time)
    queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            edges_s1_total: AtomicU64::new(0),
            edges_s2_total: AtomicU64::new(0),
            edges_out_of_sequence: AtomicU64::new(0),
            edges_debounced: AtomicU64::new(0),
            passages_completed: AtomicU64::new(0),
            passages_dropped: AtomicU64::new(0),
            passages_rejected: AtomicU64::new(0),
            status_normal: AtomicU64::new(0),
            status_warning: AtomicU64::new(0),
            status_infraction: AtomicU64::new(0),
            captures_requested: AtomicU64::new(0),
            captures_busy: AtomicU64::new(0),
            captures_succeeded: AtomicU64::new(0),
            captures_failed: AtomicU64::new(0),
            display_publishes: AtomicU64::new(0),
            processed_since_report: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_edge(&self, sensor: SensorId) {
        match sensor {
            SensorId::S1 => self.edges_s1_total.fetch_add(1, Ordering::Relaxed),
            SensorId::S2 => self.edges_s2_total.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_out_of_sequence(&self) {
        self.edges_out_of_sequence.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_debounced(&self) {
        self.edges_debounced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_passage_completed(&self) {
        self.passages_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a passage dropped because the queue was full
    #[inline]
    pub fn record_passage_dropped(&self) {
        self.passages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_passage_rejected(&self) {
        self.passages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one classified passage with its control-loop processing latency
    #[inline]
    pub fn record_classified(&self, status: ViolationStatus, latency_us: u64) {
        let counter = match status {
            ViolationStatus::Normal => &self.status_normal,
            ViolationStatus::Warning => &self.status_warning,
            ViolationStatus::Infraction => &self.status_infraction,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.processed_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_capture_requested(&self) {
        self.captures_requested.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_busy(&self) {
        self.captures_busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_result(&self, succeeded: bool) {
        if succeeded {
            self.captures_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.captures_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_display_publish(&self) {
        self.display_publishes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn passages_completed(&self) -> u64 {
        self.passages_completed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn passages_dropped(&self) -> u64 {
        self.passages_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn passages_rejected(&self) -> u64 {
        self.passages_rejected.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn edges_out_of_sequence(&self) -> u64 {
        self.edges_out_of_sequence.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn edges_debounced(&self) -> u64 {
        self.edges_debounced.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn captures_busy(&self) -> u64 {
        self.captures_busy.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn display_publishes(&self) -> u64 {
        self.display_publishes.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let processed = self.processed_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max_us = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let passages_per_min = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            edges_s1_total: self.edges_s1_total.load(Ordering::Relaxed),
            edges_s2_total: self.edges_s2_total.load(Ordering::Relaxed),
            edges_out_of_sequence: self.edges_out_of_sequence.load(Ordering::Relaxed),
            edges_debounced: self.edges_debounced.load(Ordering::Relaxed),
            passages_completed: self.passages_completed.load(Ordering::Relaxed),
            passages_dropped: self.passages_dropped.load(Ordering::Relaxed),
            passages_rejected: self.passages_rejected.load(Ordering::Relaxed),
            passages_per_min,
            status_normal: self.status_normal.load(Ordering::Relaxed),
            status_warning: self.status_warning.load(Ordering::Relaxed),
            status_infraction: self.status_infraction.load(Ordering::Relaxed),
            captures_requested: self.captures_requested.load(Ordering::Relaxed),
            captures_busy: self.captures_busy.load(Ordering::Relaxed),
            captures_succeeded: self.captures_succeeded.load(Ordering::Relaxed),
            captures_failed: self.captures_failed.load(Ordering::Relaxed),
            display_publishes: self.display_publishes.load(Ordering::Relaxed),
            lat_buckets,
            lat_avg_us: if processed > 0 { latency_sum / processed } else { 0 },
            lat_max_us: latency_max_us,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub edges_s1_total: u64,
    pub edges_s2_total: u64,
    pub edges_out_of_sequence: u64,
    pub edges_debounced: u64,
    pub passages_completed: u64,
    pub passages_dropped: u64,
    pub passages_rejected: u64,
    /// Classified passages per minute since the last report
    pub passages_per_min: f64,
    pub status_normal: u64,
    pub status_warning: u64,
    pub status_infraction: u64,
    pub captures_requested: u64,
    pub captures_busy: u64,
    pub captures_succeeded: u64,
    pub captures_failed: u64,
    pub display_publishes: u64,
    /// Processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_avg_us: u64,
    pub lat_max_us: u64,
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            passages = %self.passages_completed,
            passages_per_min = format!("{:.1}", self.passages_per_min),
            dropped = %self.passages_dropped,
            rejected = %self.passages_rejected,
            normal = %self.status_normal,
            warning = %self.status_warning,
            infraction = %self.status_infraction,
            captures = %self.captures_requested,
            captures_busy = %self.captures_busy,
            out_of_sequence = %self.edges_out_of_sequence,
            p99_us = %self.lat_p99_us,
            queue_depth = %self.queue_depth,
            "metrics"
        );
    }
}
