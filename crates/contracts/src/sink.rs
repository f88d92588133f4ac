//! FrameSink trait - consumer-side delivery interface
//!
//! Defines the abstract interface for frame consumers driven off a
//! subscription handle (demo renderers, probe loggers).

use crate::{Frame, StreamError};

/// Frame consumer trait
///
/// Implementations receive already-projected frames at their own cadence.
#[trait_variant::make(FrameSink: Send)]
pub trait LocalFrameSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Consume one delivered frame
    ///
    /// # Errors
    /// Returns a delivery error (should include context)
    async fn deliver(&mut self, frame: &Frame) -> Result<(), StreamError>;

    /// Flush buffered output (if any)
    async fn flush(&mut self) -> Result<(), StreamError>;

    /// Close the sink
    async fn close(&mut self) -> Result<(), StreamError>;
}
