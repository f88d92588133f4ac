//! Prometheus metric recording for the streaming session
//!
//! Thin helpers over the `metrics` macros so every crate labels the same
//! metric names the same way.

use contracts::SessionState;
use metrics::{counter, gauge, histogram};

/// Record one produced frame.
///
/// Call once per frame the solver hands over, before any queueing.
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_frame_produced;
///
/// let outcome = production.push(DeliveryEnvelope::new(frame.clone()));
/// record_frame_produced(frame.meta.step_index, frame.is_preview());
/// ```
pub fn record_frame_produced(step_index: u64, preview: bool) {
    let fidelity = if preview { "preview" } else { "full" };
    counter!("fea_stream_frames_produced_total", "fidelity" => fidelity).increment(1);
    gauge!("fea_stream_last_step_index").set(step_index as f64);
}

/// Record a frame lost to a queue's drop policy
pub fn record_frame_dropped(queue: &str) {
    counter!("fea_stream_frames_dropped_total", "queue" => queue.to_string()).increment(1);
}

/// Record a frame handed to a subscriber
pub fn record_frame_delivered(subscription: &str) {
    counter!(
        "fea_stream_frames_delivered_total",
        "subscription" => subscription.to_string()
    )
    .increment(1);
}

/// Record production-to-delivery latency for one frame
pub fn record_delivery_latency_ms(subscription: &str, latency_ms: f64) {
    histogram!(
        "fea_stream_delivery_latency_ms",
        "subscription" => subscription.to_string()
    )
    .record(latency_ms);
}

/// Record a queue's current depth
pub fn record_queue_depth(queue: &str, depth: usize) {
    gauge!("fea_stream_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

/// Record wall time spent computing one solver step
pub fn record_solver_step_ms(elapsed_ms: f64) {
    histogram!("fea_stream_solver_step_ms").record(elapsed_ms);
}

/// Record a session lifecycle transition
pub fn record_state_transition(from: SessionState, to: SessionState) {
    counter!(
        "fea_stream_state_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record wall time from seek request to settled exact frame
pub fn record_seek_settle_ms(elapsed_ms: f64) {
    histogram!("fea_stream_seek_settle_ms").record(elapsed_ms);
}

/// Record an emitted session event by kind
pub fn record_session_event(kind: &'static str) {
    counter!("fea_stream_session_events_total", "kind" => kind).increment(1);
}
