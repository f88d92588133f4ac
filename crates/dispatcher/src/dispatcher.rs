//! FanoutDispatcher - subscription registry and fan-out loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use slab::Slab;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use contracts::{StreamError, SubscriptionDiagnostics, SubscriptionSpec};
use frame_queue::{bounded, DeliveryEnvelope, FrameConsumer, PushOutcome, QueueConfig};
use observability::metrics::{record_frame_dropped, record_queue_depth};
use observability::DeliveryStats;

use crate::handle::FrameStreamHandle;
use crate::project::project_frame;

/// Latency samples kept per subscription for the p50/p95 window.
const DEFAULT_LATENCY_WINDOW: usize = 256;

/// Registry key of a live subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

impl SubscriptionId {
    /// Sentinel for handles built outside the registry (the replay feed).
    /// Never issued by `subscribe`; unsubscribing it is a no-op.
    pub(crate) const DIRECT: SubscriptionId = SubscriptionId(usize::MAX);
}

#[derive(Debug)]
struct SubscriptionEntry {
    /// Registration order; slab keys get reused, serials do not
    serial: u64,
    spec: SubscriptionSpec,
    tx: frame_queue::FrameProducer,
    stats: Arc<DeliveryStats>,
}

#[derive(Debug)]
struct DispatcherShared {
    registry: Mutex<Slab<SubscriptionEntry>>,
    latency_window: usize,
    next_serial: AtomicU64,
    /// Drops charged to subscriptions that have since been removed, so
    /// [`FanoutDispatcher::dropped_total`] never moves backward.
    dropped_carry: AtomicU64,
}

impl DispatcherShared {
    /// Close a departing entry's queue and keep its drop count.
    ///
    /// The queue stops dropping once closed, so the snapshot here is final.
    fn retire(&self, entry: &SubscriptionEntry) {
        entry.tx.close();
        let dropped = entry.tx.metrics().snapshot().frames_dropped;
        self.dropped_carry.fetch_add(dropped, Ordering::Relaxed);
    }
}

/// Fans produced frames out to every live subscription's private queue
///
/// Clones share one registry, so the session driver can dispatch while API
/// callers subscribe and unsubscribe concurrently.
#[derive(Debug, Clone)]
pub struct FanoutDispatcher {
    shared: Arc<DispatcherShared>,
}

impl Default for FanoutDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::with_latency_window(DEFAULT_LATENCY_WINDOW)
    }

    /// Create an empty dispatcher with a custom latency window size.
    pub fn with_latency_window(latency_window: usize) -> Self {
        Self {
            shared: Arc::new(DispatcherShared {
                registry: Mutex::new(Slab::new()),
                latency_window: latency_window.max(1),
                next_serial: AtomicU64::new(0),
                dropped_carry: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber and hand back the consuming end of its queue.
    ///
    /// The spec is checked before any queue is built; a rejected spec leaves
    /// the registry untouched.
    #[instrument(name = "dispatcher_subscribe", skip(self, spec), fields(label = %spec.label))]
    pub fn subscribe(&self, spec: SubscriptionSpec) -> Result<FrameStreamHandle, StreamError> {
        spec.validate()?;

        let (tx, rx) = bounded(
            spec.label.clone(),
            QueueConfig::new(spec.queue_depth, spec.drop_policy),
        );
        let stats = Arc::new(DeliveryStats::new(self.shared.latency_window));
        let serial = self.shared.next_serial.fetch_add(1, Ordering::Relaxed);

        let key = self.shared.registry.lock().unwrap().insert(SubscriptionEntry {
            serial,
            spec: spec.clone(),
            tx,
            stats: stats.clone(),
        });

        info!(
            label = %spec.label,
            depth = spec.queue_depth,
            policy = ?spec.drop_policy,
            "subscription registered"
        );
        Ok(FrameStreamHandle::new(SubscriptionId(key), spec, rx, stats))
    }

    /// Remove a subscription and close its queue.
    ///
    /// Already-queued frames stay poppable on the handle. Returns `false`
    /// when the id is unknown (double unsubscribe is not an error).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.shared.registry.lock().unwrap().try_remove(id.0);
        match removed {
            Some(entry) => {
                self.shared.retire(&entry);
                info!(label = %entry.spec.label, "subscription removed");
                true
            }
            None => false,
        }
    }

    /// Fan one produced frame out to every live subscription.
    ///
    /// Never blocks: each queue applies its own drop policy, so a stalled
    /// subscriber loses its own frames and nobody else's. Subscriptions
    /// whose handle was dropped are reaped here. `produced_at` is carried
    /// over so consumer latency still measures production to pop.
    pub fn dispatch(&self, envelope: &DeliveryEnvelope) {
        let mut registry = self.shared.registry.lock().unwrap();
        let mut stale = Vec::new();

        for (key, entry) in registry.iter() {
            let projected = DeliveryEnvelope {
                frame: project_frame(&envelope.frame, &entry.spec),
                produced_at: envelope.produced_at,
            };

            let outcome = entry.tx.push(projected);
            if outcome == PushOutcome::Closed {
                stale.push(key);
                continue;
            }
            if outcome.dropped_frame() {
                record_frame_dropped(&entry.spec.label);
            }
            record_queue_depth(&entry.spec.label, entry.tx.len());
        }

        for key in stale {
            if let Some(entry) = registry.try_remove(key) {
                self.shared.retire(&entry);
                debug!(label = %entry.spec.label, "reaped subscription with dropped handle");
            }
        }
    }

    /// Consume the production queue until it closes, fanning out each frame.
    #[instrument(name = "dispatcher_run", skip(self, production))]
    pub async fn run(self, production: FrameConsumer) {
        info!("dispatcher started");

        let mut frame_count: u64 = 0;

        while let Some(envelope) = production.pop().await {
            frame_count += 1;
            self.dispatch(&envelope);

            if frame_count.is_multiple_of(100) {
                debug!(frames = frame_count, "dispatcher progress");
            }
        }

        info!(frames = frame_count, "production queue closed, shutting down");
        self.close_all();
        info!("dispatcher shutdown complete");
    }

    /// Spawn [`Self::run`] as a background task.
    pub fn spawn(&self, production: FrameConsumer) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run(production).await;
        })
    }

    /// Close every subscription queue and clear the registry.
    ///
    /// Queued frames stay poppable; handles see end-of-stream once drained.
    pub fn close_all(&self) {
        let mut registry = self.shared.registry.lock().unwrap();
        for (_, entry) in registry.iter() {
            self.shared.retire(entry);
        }
        let closed = registry.len();
        registry.clear();
        if closed > 0 {
            info!(subscriptions = closed, "all subscriptions closed");
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.lock().unwrap().len()
    }

    /// Total frames lost to subscription drop policies so far.
    ///
    /// Counts removed subscriptions too; the total only ever grows.
    pub fn dropped_total(&self) -> u64 {
        let registry = self.shared.registry.lock().unwrap();
        let live: u64 = registry
            .iter()
            .map(|(_, entry)| entry.tx.metrics().snapshot().frames_dropped)
            .sum();
        live + self.shared.dropped_carry.load(Ordering::Relaxed)
    }

    /// Per-subscription diagnostics, in registration order.
    pub fn diagnostics(&self) -> Vec<SubscriptionDiagnostics> {
        let registry = self.shared.registry.lock().unwrap();
        let mut entries: Vec<_> = registry.iter().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.serial);

        entries
            .into_iter()
            .map(|entry| {
                let counters = entry.tx.metrics().snapshot();
                let summary = entry.stats.summary();
                SubscriptionDiagnostics {
                    label: entry.spec.label.clone(),
                    queue_depth: entry.tx.len(),
                    queue_capacity: entry.tx.capacity(),
                    delivered: counters.frames_delivered,
                    dropped: counters.frames_dropped,
                    latency_p50_ms: summary.latency_p50_ms,
                    latency_p95_ms: summary.latency_p95_ms,
                    render_dt: summary.render_dt,
                }
            })
            .collect()
    }
}
