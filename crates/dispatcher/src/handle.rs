//! FrameStreamHandle - a subscriber's consuming end of its private queue

use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use contracts::{Frame, FrameSink, SubscriptionSpec};
use frame_queue::{DeliveryEnvelope, FrameConsumer, MetricsSnapshot, PopError};
use observability::metrics::{record_delivery_latency_ms, record_frame_delivered};
use observability::{DeliveryStats, DeliverySummary};

use crate::dispatcher::SubscriptionId;

/// A subscriber's view of its private frame queue
///
/// Every pop feeds the delivery counters and the latency window behind
/// diagnostics. Dropping the handle ends the subscription; the dispatcher
/// reaps the registry entry on its next dispatch.
#[derive(Debug)]
pub struct FrameStreamHandle {
    id: SubscriptionId,
    spec: SubscriptionSpec,
    rx: FrameConsumer,
    stats: Arc<DeliveryStats>,
}

impl FrameStreamHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        spec: SubscriptionSpec,
        rx: FrameConsumer,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self { id, spec, rx, stats }
    }

    /// Wrap a bare queue consumer in a stream handle, outside any registry.
    ///
    /// The replay feed hands the production queue straight to one caller
    /// without projection, so recorded hashes stay verifiable. The handle
    /// still feeds delivery counters and the latency window.
    pub fn direct(spec: SubscriptionSpec, rx: FrameConsumer, latency_window: usize) -> Self {
        let stats = Arc::new(DeliveryStats::new(latency_window));
        Self::new(SubscriptionId::DIRECT, spec, rx, stats)
    }

    /// Rolled-up delivery timing for this handle.
    pub fn delivery_summary(&self) -> DeliverySummary {
        self.stats.summary()
    }

    /// Registry id, used to unsubscribe.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscriber label.
    pub fn label(&self) -> &str {
        &self.spec.label
    }

    /// The spec this subscription registered with.
    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Wait for the next envelope.
    ///
    /// Resolves to `None` once the stream ended and the queue drained.
    pub async fn next_envelope(&self) -> Option<DeliveryEnvelope> {
        let envelope = self.rx.pop().await?;
        self.record(&envelope);
        Some(envelope)
    }

    /// Wait for the next frame, discarding the envelope timing.
    pub async fn next_frame(&self) -> Option<Frame> {
        self.next_envelope().await.map(|envelope| envelope.frame)
    }

    /// Take the next envelope if one is already queued.
    pub fn try_next(&self) -> Result<DeliveryEnvelope, PopError> {
        let envelope = self.rx.try_pop()?;
        self.record(&envelope);
        Ok(envelope)
    }

    /// Frames currently waiting in this subscription's queue.
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    /// This queue's enqueue/drop/deliver counters.
    pub fn queue_metrics(&self) -> MetricsSnapshot {
        self.rx.metrics().snapshot()
    }

    fn record(&self, envelope: &DeliveryEnvelope) {
        let latency = envelope.age();
        self.stats.record_delivery(latency);
        record_frame_delivered(&self.spec.label);
        record_delivery_latency_ms(&self.spec.label, latency.as_secs_f64() * 1000.0);
    }
}

/// Drain a subscription into a sink on a background task.
///
/// A failed write is logged and counted, then delivery continues; one bad
/// frame never kills the consumer. The task ends once the stream does, after
/// flushing and closing the sink.
pub fn drive_sink<S>(handle: FrameStreamHandle, mut sink: S) -> JoinHandle<()>
where
    S: FrameSink + 'static,
{
    tokio::spawn(async move {
        debug!(sink = %sink.name(), label = handle.label(), "sink worker started");

        while let Some(envelope) = handle.next_envelope().await {
            if let Err(e) = sink.deliver(&envelope.frame).await {
                counter!(
                    "fea_stream_sink_write_failures_total",
                    "sink" => sink.name().to_string()
                )
                .increment(1);
                error!(
                    sink = %sink.name(),
                    step_index = envelope.frame.meta.step_index,
                    error = %e,
                    "sink write failed"
                );
            }
        }

        if let Err(e) = sink.flush().await {
            error!(sink = %sink.name(), error = %e, "flush failed on shutdown");
        }
        if let Err(e) = sink.close().await {
            error!(sink = %sink.name(), error = %e, "close failed on shutdown");
        }

        debug!(sink = %sink.name(), "sink worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    use contracts::{
        u32s_to_bytes, FrameFlags, FrameMeta, NodalArrays, StreamError, TopologySnapshot,
    };

    use crate::dispatcher::FanoutDispatcher;

    struct MockSink {
        name: String,
        delivered: Arc<AtomicU64>,
        should_fail: bool,
    }

    impl FrameSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&mut self, _frame: &Frame) -> Result<(), StreamError> {
            if self.should_fail {
                return Err(StreamError::Other("mock failure".to_string()));
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), StreamError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StreamError> {
            Ok(())
        }
    }

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

    #[tokio::test]
    async fn drive_sink_delivers_every_frame() {
        let dispatcher = FanoutDispatcher::new();
        let handle = dispatcher
            .subscribe(SubscriptionSpec::new("recorder").with_queue_depth(8))
            .unwrap();

        for step in 0..5 {
            dispatcher.dispatch(&DeliveryEnvelope::new(test_frame(step)));
        }
        dispatcher.close_all();

        let delivered = Arc::new(AtomicU64::new(0));
        let sink = MockSink {
            name: "recorder".to_string(),
            delivered: delivered.clone(),
            should_fail: false,
        };

        drive_sink(handle, sink).await.unwrap();
        assert_eq!(delivered.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn drive_sink_survives_write_failures() {
        let dispatcher = FanoutDispatcher::new();
        let handle = dispatcher.subscribe(SubscriptionSpec::new("flaky")).unwrap();

        for step in 0..3 {
            dispatcher.dispatch(&DeliveryEnvelope::new(test_frame(step)));
        }
        dispatcher.close_all();

        let delivered = Arc::new(AtomicU64::new(0));
        let sink = MockSink {
            name: "flaky".to_string(),
            delivered: delivered.clone(),
            should_fail: true,
        };

        // The worker finishes cleanly even though every write failed.
        drive_sink(handle, sink).await.unwrap();
        assert_eq!(delivered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn pops_feed_delivery_counters() {
        let dispatcher = FanoutDispatcher::new();
        let handle = dispatcher.subscribe(SubscriptionSpec::new("viewer")).unwrap();

        dispatcher.dispatch(&DeliveryEnvelope::new(test_frame(0)));
        dispatcher.dispatch(&DeliveryEnvelope::new(test_frame(1)));

        assert_eq!(handle.next_frame().await.unwrap().meta.step_index, 0);
        assert_eq!(handle.try_next().unwrap().frame.meta.step_index, 1);

        assert_eq!(handle.queue_metrics().frames_delivered, 2);
        assert_eq!(handle.depth(), 0);

        let diag = &dispatcher.diagnostics()[0];
        assert_eq!(diag.delivered, 2);
        assert!(diag.latency_p50_ms >= 0.0);
    }
}
