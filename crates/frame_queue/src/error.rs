//! Frame queue error types

use thiserror::Error;

use crate::queue::DeliveryEnvelope;

/// Error returned by a non-blocking pop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    /// No frame is queued right now; the producer is still alive
    #[error("frame queue is empty")]
    Empty,

    /// The queue is closed and fully drained
    #[error("frame queue is closed")]
    Closed,
}

impl PopError {
    /// True once the stream has ended for good
    pub fn is_closed(&self) -> bool {
        matches!(self, PopError::Closed)
    }
}

/// Error returned by a push that refuses to discard anything.
///
/// The rejected envelope rides along so the caller can retry it. Nothing is
/// counted as dropped; only [`crate::FrameProducer::push`] applies the drop
/// policy.
#[derive(Debug, Error)]
pub enum TryPushError {
    /// The queue is at capacity; retry once the consumer drains it
    #[error("frame queue is full")]
    Full(DeliveryEnvelope),

    /// The consumer is gone; the stream has ended
    #[error("frame queue is closed")]
    Closed(DeliveryEnvelope),
}

impl TryPushError {
    /// Recover the envelope the push handed back.
    pub fn into_envelope(self) -> DeliveryEnvelope {
        match self {
            TryPushError::Full(envelope) | TryPushError::Closed(envelope) => envelope,
        }
    }

    /// True once the stream has ended for good
    pub fn is_closed(&self) -> bool {
        matches!(self, TryPushError::Closed(_))
    }
}
