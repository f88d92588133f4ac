//! Bounded SPSC queue carrying frames from the solver thread to consumers

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use contracts::{DropPolicy, Frame};
use tracing::trace;

use crate::config::{QueueConfig, QueueMetrics};
use crate::error::{PopError, TryPushError};

/// A frame paired with the instant it left the solver.
///
/// Latency measured at the consumer therefore covers queue residency plus
/// hand-off, not solver compute time.
#[derive(Debug, Clone)]
pub struct DeliveryEnvelope {
    /// The produced frame
    pub frame: Frame,

    /// When the solver handed the frame over
    pub produced_at: Instant,
}

impl DeliveryEnvelope {
    /// Wrap a frame, stamping the production instant.
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            produced_at: Instant::now(),
        }
    }

    /// Time elapsed since the frame was produced.
    pub fn age(&self) -> Duration {
        self.produced_at.elapsed()
    }
}

/// What happened to a pushed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was queued without displacing anything
    Queued,

    /// The frame was queued and the oldest queued frame was discarded
    DroppedOldest,

    /// The queue was full and this frame was discarded
    DroppedNewest,

    /// The consumer is gone; the frame was discarded
    Closed,
}

impl PushOutcome {
    /// True if a frame was lost, whichever end of the queue it was.
    pub fn dropped_frame(&self) -> bool {
        matches!(self, PushOutcome::DroppedOldest | PushOutcome::DroppedNewest)
    }
}

/// Create a bounded frame queue.
///
/// `label` tags trace output. Capacity comes from `config` and must be at
/// least 1.
pub fn bounded(label: impl Into<Arc<str>>, config: QueueConfig) -> (FrameProducer, FrameConsumer) {
    let label = label.into();
    let (tx, rx) = async_channel::bounded(config.capacity);
    let metrics = Arc::new(QueueMetrics::new());

    (
        FrameProducer {
            label: label.clone(),
            tx,
            drop_policy: config.drop_policy,
            metrics: metrics.clone(),
        },
        FrameConsumer { label, rx, metrics },
    )
}

/// Producing end of a frame queue, held by the session driver thread
#[derive(Debug)]
pub struct FrameProducer {
    label: Arc<str>,
    tx: Sender<DeliveryEnvelope>,
    drop_policy: DropPolicy,
    metrics: Arc<QueueMetrics>,
}

impl FrameProducer {
    /// Push a frame without blocking, applying the configured drop policy.
    #[inline]
    pub fn push(&self, envelope: DeliveryEnvelope) -> PushOutcome {
        let outcome = match self.drop_policy {
            DropPolicy::DropOldest => match self.tx.force_send(envelope) {
                Ok(None) => PushOutcome::Queued,
                Ok(Some(_displaced)) => PushOutcome::DroppedOldest,
                Err(_) => PushOutcome::Closed,
            },
            DropPolicy::DropNewest => match self.tx.try_send(envelope) {
                Ok(()) => PushOutcome::Queued,
                Err(TrySendError::Full(_)) => PushOutcome::DroppedNewest,
                Err(TrySendError::Closed(_)) => PushOutcome::Closed,
            },
        };

        match outcome {
            PushOutcome::Queued => {
                self.metrics.record_enqueued();
                trace!(queue = %self.label, "frame queued");
            }
            PushOutcome::DroppedOldest => {
                self.metrics.record_enqueued();
                self.metrics.record_dropped();
                trace!(queue = %self.label, "frame queued, oldest displaced");
            }
            PushOutcome::DroppedNewest => {
                self.metrics.record_dropped();
                trace!(queue = %self.label, "frame dropped (newest)");
            }
            PushOutcome::Closed => {
                trace!(queue = %self.label, "push on closed queue");
            }
        }
        self.metrics.update_queue_len(self.tx.len());
        outcome
    }

    /// Try to enqueue without invoking the drop policy.
    ///
    /// A full queue hands the envelope back instead of discarding anything,
    /// and no drop is counted. The replay feed retries on [`TryPushError::Full`]
    /// to stay lossless; live streaming always goes through [`Self::push`].
    pub fn try_push(&self, envelope: DeliveryEnvelope) -> Result<(), TryPushError> {
        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.metrics.record_enqueued();
                self.metrics.update_queue_len(self.tx.len());
                trace!(queue = %self.label, "frame queued");
                Ok(())
            }
            Err(TrySendError::Full(envelope)) => Err(TryPushError::Full(envelope)),
            Err(TrySendError::Closed(envelope)) => Err(TryPushError::Closed(envelope)),
        }
    }

    /// Close the queue. Queued frames stay poppable; blocked consumers wake.
    pub fn close(&self) {
        self.tx.close();
    }

    /// True once either end has closed the queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True when no frame is queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Queue capacity in frames.
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    /// Shared queue counters.
    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }
}

/// Consuming end of a frame queue
#[derive(Debug)]
pub struct FrameConsumer {
    label: Arc<str>,
    rx: Receiver<DeliveryEnvelope>,
    metrics: Arc<QueueMetrics>,
}

impl FrameConsumer {
    /// Wait for the next frame.
    ///
    /// Resolves to `None` once the queue is closed and drained. Cancel-safe:
    /// dropping the future never loses a frame.
    pub async fn pop(&self) -> Option<DeliveryEnvelope> {
        match self.rx.recv().await {
            Ok(envelope) => {
                self.metrics.record_delivered();
                self.metrics.update_queue_len(self.rx.len());
                Some(envelope)
            }
            Err(_) => {
                trace!(queue = %self.label, "queue closed and drained");
                None
            }
        }
    }

    /// Take the next frame if one is queued, without waiting.
    pub fn try_pop(&self) -> Result<DeliveryEnvelope, PopError> {
        match self.rx.try_recv() {
            Ok(envelope) => {
                self.metrics.record_delivered();
                self.metrics.update_queue_len(self.rx.len());
                Ok(envelope)
            }
            Err(TryRecvError::Empty) => Err(PopError::Empty),
            Err(TryRecvError::Closed) => Err(PopError::Closed),
        }
    }

    /// Close the queue from the consuming side. The producer sees
    /// [`PushOutcome::Closed`] from then on.
    pub fn close(&self) {
        self.rx.close();
    }

    /// True once either end has closed the queue.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no frame is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Queue capacity in frames.
    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(0)
    }

    /// Shared queue counters.
    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use contracts::{u32s_to_bytes, FrameFlags, FrameMeta, NodalArrays, TopologySnapshot};

    fn test_frame(step_index: u64) -> Frame {
        Frame {
            meta: FrameMeta::unsealed(step_index as f64 * 1e-3, step_index, FrameFlags::empty()),
            topology: Arc::new(TopologySnapshot {
                topo_version: 1,
                parts: Vec::new(),
                index_buffer: u32s_to_bytes(Vec::new()),
            }),
            nodal: NodalArrays::from_displacements(Vec::new(), Vec::new(), Vec::new()).unwrap(),
            contact: None,
            probes: None,
            aggregates: None,
        }
    }

    fn envelope(step_index: u64) -> DeliveryEnvelope {
        DeliveryEnvelope::new(test_frame(step_index))
    }

    #[test]
    fn push_within_capacity_queues() {
        let (tx, rx) = bounded("test", QueueConfig::new(2, DropPolicy::DropOldest));
        assert_eq!(tx.push(envelope(0)), PushOutcome::Queued);
        assert_eq!(tx.len(), 1);
        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 0);
        assert_eq!(tx.metrics().snapshot().frames_enqueued, 1);
    }

    #[test]
    fn drop_oldest_displaces_the_head() {
        let (tx, rx) = bounded("test", QueueConfig::new(2, DropPolicy::DropOldest));
        assert_eq!(tx.push(envelope(0)), PushOutcome::Queued);
        assert_eq!(tx.push(envelope(1)), PushOutcome::Queued);
        assert_eq!(tx.push(envelope(2)), PushOutcome::DroppedOldest);

        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 1);
        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 2);

        let snapshot = tx.metrics().snapshot();
        assert_eq!(snapshot.frames_enqueued, 3);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.frames_delivered, 2);
    }

    #[test]
    fn drop_newest_rejects_the_incoming_frame() {
        let (tx, rx) = bounded("test", QueueConfig::new(2, DropPolicy::DropNewest));
        tx.push(envelope(0));
        tx.push(envelope(1));
        assert_eq!(tx.push(envelope(2)), PushOutcome::DroppedNewest);

        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 0);
        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 1);
        assert_eq!(tx.metrics().snapshot().frames_dropped, 1);
    }

    #[test]
    fn try_pop_tells_empty_from_closed() {
        let (tx, rx) = bounded("test", QueueConfig::default());
        assert_eq!(rx.try_pop().unwrap_err(), PopError::Empty);

        tx.push(envelope(0));
        tx.close();

        // Queued frames drain before the closed signal surfaces.
        assert!(rx.try_pop().is_ok());
        assert_eq!(rx.try_pop().unwrap_err(), PopError::Closed);
    }

    #[test]
    fn dropping_the_producer_closes_the_queue() {
        let (tx, rx) = bounded("test", QueueConfig::default());
        drop(tx);
        assert_eq!(rx.try_pop().unwrap_err(), PopError::Closed);
    }

    #[test]
    fn try_push_hands_the_frame_back_when_full() {
        let (tx, rx) = bounded("replay", QueueConfig::new(2, DropPolicy::DropOldest));
        tx.try_push(envelope(0)).unwrap();
        tx.try_push(envelope(1)).unwrap();

        let rejected = tx.try_push(envelope(2)).unwrap_err();
        assert!(!rejected.is_closed());
        let envelope = rejected.into_envelope();
        assert_eq!(envelope.frame.meta.step_index, 2);

        // Nothing was displaced or counted as dropped.
        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 0);
        tx.try_push(envelope).unwrap();
        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 1);
        assert_eq!(rx.try_pop().unwrap().frame.meta.step_index, 2);
        assert_eq!(tx.metrics().snapshot().frames_dropped, 0);
    }

    #[test]
    fn try_push_reports_closure() {
        let (tx, rx) = bounded("replay", QueueConfig::new(2, DropPolicy::DropOldest));
        rx.close();
        assert!(tx.try_push(envelope(0)).unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn pop_drains_then_reports_end_of_stream() {
        let (tx, rx) = bounded("test", QueueConfig::default());
        tx.push(envelope(7));
        tx.close();

        let delivered = rx.pop().await.unwrap();
        assert_eq!(delivered.frame.meta.step_index, 7);
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_consumer() {
        let (tx, rx) = bounded("test", QueueConfig::default());
        let waiter = tokio::spawn(async move { rx.pop().await });
        tokio::task::yield_now().await;
        tx.close();
        assert!(waiter.await.unwrap().is_none());
    }
}
