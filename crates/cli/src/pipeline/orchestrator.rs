//! Session orchestrator - wires a blueprint into a running session.
//!
//! Owns the session for the duration of a `run` invocation: binds the
//! synthetic solver, registers subscribers, supervises production, and
//! tears everything down in an order that lets capture artifacts
//! finalize before the process exits.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use config_loader::StreamBlueprint;
use session::{drive_sink, FrameStreamHandle, LogSink, Session, SessionState, SubscriptionSpec};
use synthetic_solver::SyntheticStepper;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{CaptureReport, RunStats, SubscriberReport};

/// Supervision cadence; also bounds how late a stop condition is noticed.
const SUPERVISE_POLL: Duration = Duration::from_millis(100);

/// Polls between progress log lines.
const PROGRESS_EVERY: u32 = 50;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// The resolved stream blueprint
    pub blueprint: StreamBlueprint,

    /// Maximum number of frames to produce (None = unlimited)
    pub max_frames: Option<u64>,

    /// Session timeout (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Main session orchestrator
pub struct StreamRunner {
    config: RunnerConfig,
}

impl StreamRunner {
    /// Create a new runner with the given configuration
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run the session until a stop condition or the shutdown future fires.
    ///
    /// Teardown always runs: an in-flight capture is finalized and the
    /// session stopped before stats are returned, whichever way the run
    /// ended.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        // Initialize Metrics (optional)
        if let Some(port) = blueprint.observability.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Bind the solver
        let stepper = SyntheticStepper::new(blueprint.solver.clone())
            .context("Failed to build the synthetic solver")?;

        info!(
            dt = blueprint.solver.dt,
            rpm = blueprint.solver.profile.rpm,
            segments = blueprint.solver.mesh.segments,
            parts = blueprint.solver.mesh.part_count,
            "Solver ready"
        );

        let mut session = Session::new();
        session
            .start(Box::new(stepper), blueprint.session_config())
            .context("Failed to start session")?;

        // Register subscribers
        let specs = blueprint
            .subscription_specs()
            .context("Invalid subscription configuration")?;

        let mut consumers = Vec::with_capacity(specs.len());
        for spec in specs {
            let handle = session
                .subscribe_frames(spec)
                .context("Failed to register subscriber")?;
            info!(label = %handle.label(), depth = handle.spec().queue_depth, "Subscriber registered");
            consumers.push(spawn_consumer(handle));
        }

        // A run with no subscribers still gets one: frames go to a log sink
        // so the stream stays observable.
        let mut sink_task = None;
        if consumers.is_empty() {
            warn!("No subscriptions configured - logging frames through the console sink");
            let handle = session
                .subscribe_frames(SubscriptionSpec::new("console"))
                .context("Failed to register the console sink")?;
            sink_task = Some(drive_sink(handle, LogSink::new("console")));
        }

        // Begin capture when the blueprint asks for it
        let mut capture_handle = None;
        if blueprint.capture.auto_start {
            if let Some(ref dir) = blueprint.capture.directory {
                let handle = session
                    .capture_begin(dir.clone())
                    .await
                    .context("Failed to begin capture")?;
                info!(path = %handle.path().display(), "Capture recording");
                capture_handle = Some(handle);
            }
        }

        // Supervise until a stop condition fires
        let max_frames = self.config.max_frames;
        let deadline = self.config.timeout.map(|t| start_time + t);
        let mut fault = None;
        let mut polls = 0u32;

        info!(max_frames = ?max_frames, timeout = ?self.config.timeout, "Session running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(SUPERVISE_POLL) => {}
            }
            polls += 1;

            let diagnostics = session.get_diagnostics();

            if diagnostics.state == SessionState::Error {
                fault = session.last_error();
                warn!(
                    step = diagnostics.step_index,
                    error = fault.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown"),
                    "Session entered error state"
                );
                break;
            }

            if let Some(max) = max_frames {
                if diagnostics.produced_total >= max {
                    info!(frames = diagnostics.produced_total, "Reached max frames limit");
                    break;
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!(
                        frames = diagnostics.produced_total,
                        "Session timeout elapsed"
                    );
                    break;
                }
            }

            if polls % PROGRESS_EVERY == 0 {
                info!(
                    frames = diagnostics.produced_total,
                    dropped = diagnostics.dropped_total,
                    step = diagnostics.step_index,
                    t_sim = format!("{:.4}", diagnostics.time_s),
                    "Streaming"
                );
            }
        }

        // Finalize the capture before the session goes away
        let capture = match capture_handle {
            Some(handle) => {
                let artifact = session
                    .capture_end(handle)
                    .await
                    .context("Failed to finalize capture")?;
                let manifest = artifact.manifest();
                info!(
                    path = %artifact.root().display(),
                    frames = manifest.frame_count,
                    "Capture finished"
                );
                Some(CaptureReport {
                    path: artifact.root().to_path_buf(),
                    frames: manifest.frame_count,
                    dropped_while_recording: manifest.dropped_during_capture,
                })
            }
            None => None,
        };

        // Per-subscription queue state dies with the runtime, so snapshot first.
        let diagnostics = session.get_diagnostics();

        session.stop().await.context("Failed to stop session")?;

        // Subscriber queues are closed now; the consumer tasks drain and return.
        let mut subscribers = Vec::with_capacity(consumers.len());
        for task in consumers {
            match task.await {
                Ok(report) => subscribers.push(report),
                Err(e) => warn!(error = %e, "Subscriber task failed"),
            }
        }
        if let Some(task) = sink_task {
            if task.await.is_err() {
                warn!("Console sink task failed");
            }
        }

        let stats = RunStats {
            frames_produced: diagnostics.produced_total,
            frames_dropped: diagnostics.dropped_total,
            final_step: diagnostics.step_index,
            sim_time_s: diagnostics.time_s,
            duration: start_time.elapsed(),
            solver_dt: diagnostics.solver_dt,
            subscribers,
            capture,
            fault,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            rate_hz = format!("{:.2}", stats.step_rate_hz()),
            "Session shutdown complete"
        );

        Ok(stats)
    }
}

/// Drain one subscription handle to completion, tallying what arrived.
fn spawn_consumer(handle: FrameStreamHandle) -> JoinHandle<SubscriberReport> {
    tokio::spawn(async move {
        let label = handle.label().to_string();
        let mut delivered = 0u64;
        let mut preview = 0u64;
        let mut last_step = None;

        while let Some(frame) = handle.next_frame().await {
            delivered += 1;
            if frame.is_preview() {
                preview += 1;
            }
            last_step = Some(frame.meta.step_index);
        }

        let summary = handle.delivery_summary();
        SubscriberReport {
            label,
            delivered,
            dropped: handle.queue_metrics().frames_dropped,
            preview,
            last_step,
            latency_p50_ms: summary.latency_p50_ms,
            latency_p95_ms: summary.latency_p95_ms,
        }
    })
}
