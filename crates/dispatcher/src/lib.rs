//! # Dispatcher
//!
//! Frame fan-out to subscribers.
//!
//! Responsibilities:
//! - Project each produced frame down to what a subscription asked for
//! - Push into per-subscription bounded queues without ever blocking the
//!   producer
//! - Isolate slow subscribers: a full queue applies that subscription's own
//!   drop policy and nobody else notices
//! - Per-subscription delivery diagnostics
//!
//! ## Usage
//!
//! ```ignore
//! use dispatcher::{FanoutDispatcher, SubscriptionSpec};
//!
//! let dispatcher = FanoutDispatcher::new();
//! let viewer = dispatcher.subscribe(SubscriptionSpec::new("viewer"))?;
//!
//! // Production side (solver driver):
//! dispatcher.dispatch(&envelope);
//!
//! // Consumer side:
//! while let Some(frame) = viewer.next_frame().await {
//!     render(frame);
//! }
//! ```

pub mod dispatcher;
pub mod handle;
pub mod project;
pub mod sinks;

pub use contracts::{FrameSink, SubscriptionSpec};
pub use dispatcher::{FanoutDispatcher, SubscriptionId};
pub use handle::{drive_sink, FrameStreamHandle};
pub use project::project_frame;
pub use sinks::LogSink;
