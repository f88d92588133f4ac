//! Diagnostics snapshot types
//!
//! Pull-based: `get_diagnostics()` returns an immutable snapshot that is
//! replaced wholesale on each call, never mutated in place.

use serde::{Deserialize, Serialize};

use crate::SessionState;

/// Summary of a wall-clock timing series (milliseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Number of samples observed
    pub count: u64,

    /// Mean duration
    pub mean_ms: f64,

    /// Shortest observed duration
    pub min_ms: f64,

    /// Longest observed duration
    pub max_ms: f64,
}

/// Per-subscription delivery health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDiagnostics {
    /// Subscriber label
    pub label: String,

    /// Frames sitting in the private queue right now
    pub queue_depth: usize,

    /// Configured private queue capacity (reflects any coarse clamp)
    pub queue_capacity: usize,

    /// Frames handed to the consumer
    pub delivered: u64,

    /// Frames evicted or rejected by the drop policy (monotone until stop)
    pub dropped: u64,

    /// Median production-to-delivery latency over the rolling window
    pub latency_p50_ms: f64,

    /// 95th percentile production-to-delivery latency over the rolling window
    pub latency_p95_ms: f64,

    /// Wall time between consecutive consumed frames
    pub render_dt: TimingStats,
}

/// One session-wide diagnostics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Lifecycle state at snapshot time
    pub state: SessionState,

    /// Last produced step index
    pub step_index: u64,

    /// Last produced simulation time
    pub time_s: f64,

    /// Wall time per solver step
    pub solver_dt: TimingStats,

    /// Frames produced since start
    pub produced_total: u64,

    /// Frames dropped across all queues since start (monotone until stop)
    pub dropped_total: u64,

    /// Per-subscription health, in registration order
    pub subscriptions: Vec<SubscriptionDiagnostics>,
}

impl DiagnosticsSnapshot {
    /// Empty snapshot for a session with no bound stepper.
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            step_index: 0,
            time_s: 0.0,
            solver_dt: TimingStats::default(),
            produced_total: 0,
            dropped_total: 0,
            subscriptions: Vec::new(),
        }
    }

    /// Find one subscription's entry by label.
    pub fn subscription(&self, label: &str) -> Option<&SubscriptionDiagnostics> {
        self.subscriptions.iter().find(|entry| entry.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_snapshot_is_empty() {
        let snapshot = DiagnosticsSnapshot::idle();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.dropped_total, 0);
        assert!(snapshot.subscriptions.is_empty());
    }

    #[test]
    fn subscription_lookup_by_label() {
        let mut snapshot = DiagnosticsSnapshot::idle();
        snapshot.subscriptions.push(SubscriptionDiagnostics {
            label: "renderer".into(),
            queue_depth: 2,
            queue_capacity: 8,
            delivered: 120,
            dropped: 3,
            latency_p50_ms: 1.2,
            latency_p95_ms: 4.8,
            render_dt: TimingStats::default(),
        });
        assert!(snapshot.subscription("renderer").is_some());
        assert!(snapshot.subscription("probe_panel").is_none());
    }
}
