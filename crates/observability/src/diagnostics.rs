//! In-memory stats primitives behind the diagnostics snapshot
//!
//! Tracks delivery latency over a bounded rolling window and wall-clock
//! timings with Welford's algorithm. Everything here is cheap enough to
//! update on the frame hot path.

use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use contracts::TimingStats;
use ringbuf::{traits::*, HeapRb};

/// Rolling window of delivery latency samples (milliseconds)
///
/// Keeps the most recent `capacity` samples; older samples are evicted so
/// percentiles track current behaviour, not the whole run.
pub struct LatencyWindow {
    samples: HeapRb<f64>,
}

impl std::fmt::Debug for LatencyWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyWindow")
            .field("len", &self.samples.occupied_len())
            .field("capacity", &self.samples.capacity())
            .finish()
    }
}

impl LatencyWindow {
    /// Create a window holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: HeapRb::new(capacity.max(1)),
        }
    }

    /// Push a sample, evicting the oldest when full
    pub fn push(&mut self, latency_ms: f64) {
        if self.samples.is_full() {
            let _ = self.samples.try_pop();
        }
        let _ = self.samples.try_push(latency_ms);
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.samples.occupied_len()
    }

    /// True when no sample has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile over the current window, `q` in [0, 1]
    pub fn percentile(&self, q: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let rank = ((sorted.len() - 1) as f64 * q.clamp(0.0, 1.0)).round() as usize;
        Some(sorted[rank.min(sorted.len() - 1)])
    }

    /// Median latency
    pub fn p50(&self) -> Option<f64> {
        self.percentile(0.50)
    }

    /// 95th percentile latency
    pub fn p95(&self) -> Option<f64> {
        self.percentile(0.95)
    }
}

/// Online timing statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a new value
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// Sample count
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean value
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Minimum value
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Maximum value
    pub fn max(&self) -> f64 {
        self.max
    }
}

impl From<&RunningStats> for TimingStats {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count(),
            mean_ms: stats.mean(),
            min_ms: stats.min(),
            max_ms: stats.max(),
        }
    }
}

/// Per-subscription delivery timing
///
/// Written by the consuming task on every pop, read when a diagnostics
/// snapshot is assembled. One mutex per subscription, held briefly.
#[derive(Debug)]
pub struct DeliveryStats {
    inner: Mutex<DeliveryInner>,
}

#[derive(Debug)]
struct DeliveryInner {
    latency: LatencyWindow,
    render_dt: RunningStats,
    last_pop: Option<Instant>,
}

impl DeliveryStats {
    /// Create with a rolling latency window of `latency_window` samples
    pub fn new(latency_window: usize) -> Self {
        Self {
            inner: Mutex::new(DeliveryInner {
                latency: LatencyWindow::new(latency_window),
                render_dt: RunningStats::default(),
                last_pop: None,
            }),
        }
    }

    /// Record one consumed frame: its production-to-pop latency plus the
    /// wall-time gap since the previous pop
    pub fn record_delivery(&self, latency: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.latency.push(latency.as_secs_f64() * 1000.0);
        if let Some(prev) = inner.last_pop {
            inner.render_dt.push((now - prev).as_secs_f64() * 1000.0);
        }
        inner.last_pop = Some(now);
    }

    /// Current rolled-up view
    pub fn summary(&self) -> DeliverySummary {
        let inner = self.inner.lock().unwrap();
        DeliverySummary {
            latency_p50_ms: inner.latency.p50().unwrap_or(0.0),
            latency_p95_ms: inner.latency.p95().unwrap_or(0.0),
            render_dt: TimingStats::from(&inner.render_dt),
        }
    }
}

/// Rolled-up delivery timing for one subscription
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeliverySummary {
    /// Median production-to-delivery latency (ms), 0 when no samples
    pub latency_p50_ms: f64,

    /// 95th percentile production-to-delivery latency (ms), 0 when no samples
    pub latency_p95_ms: f64,

    /// Wall time between consecutive pops
    pub render_dt: TimingStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);
        stats.push(4.0);
        stats.push(5.0);

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_timing_stats_conversion() {
        let mut stats = RunningStats::default();
        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);

        let timing = TimingStats::from(&stats);
        assert_eq!(timing.count, 3);
        assert!((timing.mean_ms - 2.0).abs() < 1e-10);
        assert!((timing.min_ms - 1.0).abs() < 1e-10);
        assert!((timing.max_ms - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_latency_window_percentiles() {
        let mut window = LatencyWindow::new(16);
        for sample in [10.0, 20.0, 30.0, 40.0, 50.0] {
            window.push(sample);
        }

        assert_eq!(window.len(), 5);
        assert_eq!(window.p50(), Some(30.0));
        assert_eq!(window.p95(), Some(50.0));
    }

    #[test]
    fn test_latency_window_evicts_oldest() {
        let mut window = LatencyWindow::new(3);
        for sample in [1.0, 2.0, 3.0, 4.0] {
            window.push(sample);
        }

        assert_eq!(window.len(), 3);
        // 1.0 was evicted, so the median of {2, 3, 4} is 3.
        assert_eq!(window.p50(), Some(3.0));
    }

    #[test]
    fn test_empty_window_has_no_percentiles() {
        let window = LatencyWindow::new(8);
        assert!(window.is_empty());
        assert_eq!(window.p95(), None);
    }

    #[test]
    fn test_delivery_stats_summary() {
        let stats = DeliveryStats::new(16);
        stats.record_delivery(Duration::from_millis(5));
        stats.record_delivery(Duration::from_millis(5));

        let summary = stats.summary();
        assert!((summary.latency_p50_ms - 5.0).abs() < 1e-9);
        assert!((summary.latency_p95_ms - 5.0).abs() < 1e-9);
        // Two pops produce one inter-pop gap.
        assert_eq!(summary.render_dt.count, 1);
    }
}
