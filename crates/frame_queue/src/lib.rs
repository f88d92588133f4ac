//! # Frame Queue
//!
//! Bounded frame hand-off between the solver thread and async consumers.
//!
//! Responsibilities:
//! - Single-producer/single-consumer bounded queue of [`DeliveryEnvelope`]s
//! - Drop policy when full: displace the oldest frame or reject the newest
//! - Explicit empty/closed signalling so consumers can tell "no frame yet"
//!   from "stream ended"
//! - Per-queue enqueue/drop/deliver counters for diagnostics
//!
//! ## Usage
//!
//! ```ignore
//! use frame_queue::{bounded, DeliveryEnvelope, QueueConfig};
//!
//! let (tx, rx) = bounded("production", QueueConfig::default());
//!
//! // Solver thread:
//! tx.push(DeliveryEnvelope::new(frame));
//!
//! // Consumer task:
//! while let Some(envelope) = rx.pop().await {
//!     render(envelope.frame);
//! }
//! ```

mod config;
mod error;
mod queue;

// Re-exports
pub use config::{DropPolicy, MetricsSnapshot, QueueConfig, QueueMetrics};
pub use contracts::Frame;
pub use error::{PopError, TryPushError};
pub use queue::{bounded, DeliveryEnvelope, FrameConsumer, FrameProducer, PushOutcome};
