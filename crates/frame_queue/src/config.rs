//! Queue configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub use contracts::DropPolicy;

/// Bounded queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue capacity in frames, at least 1
    pub capacity: usize,

    /// Drop policy when full
    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

impl QueueConfig {
    /// Create a new queue configuration
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            capacity,
            drop_policy,
        }
    }
}

/// Queue counters shared by both ends
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Frames that entered the queue
    pub frames_enqueued: AtomicU64,

    /// Frames lost to the drop policy (displaced or rejected)
    pub frames_dropped: AtomicU64,

    /// Frames handed to the consumer
    pub frames_delivered: AtomicU64,

    /// Queue length after the most recent push or pop
    pub queue_len: AtomicUsize,
}

impl QueueMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame entering the queue
    pub fn record_enqueued(&self) {
        self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame lost to the drop policy
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame handed to the consumer
    pub fn record_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the observed queue length
    pub fn update_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Frames that entered the queue
    pub frames_enqueued: u64,

    /// Frames lost to the drop policy
    pub frames_dropped: u64,

    /// Frames handed to the consumer
    pub frames_delivered: u64,

    /// Queue length after the most recent push or pop
    pub queue_len: usize,
}
