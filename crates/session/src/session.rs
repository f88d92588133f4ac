//! Session - the control-plane facade over one solver run
//!
//! Owns the driver thread, the production queue, and the fan-out runtime
//! for the currently bound stepper. Commands go over a channel and return
//! their result through a oneshot reply, so command handling is serialized
//! on the driver without the API holding any solver lock.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use capture::{CaptureArtifact, CaptureWriter, ReplayStepper};
use contracts::{
    DiagnosticsSnapshot, ErrorInfo, FieldsMask, FrameStepper, ParameterSet, QualityHint,
    SessionConfig, SessionEvent, SessionState, StreamError, SubscriptionSpec, TimingStats,
};
use dispatcher::{FanoutDispatcher, FrameStreamHandle, SubscriptionId};
use frame_queue::{bounded, QueueConfig, QueueMetrics};
use observability::metrics::{record_session_event, record_state_transition};
use observability::RunningStats;

use crate::driver::{Driver, DriverCommand, FeedMode, ReplyTx};

/// Event fan-out capacity; a slow listener loses oldest events.
const EVENT_BUFFER: usize = 64;

/// Capture subscription depth, deep so a slow disk flush does not shed
/// frames.
const CAPTURE_QUEUE_DEPTH: usize = 256;

/// State shared between the API object, the driver thread, and recorder
/// tasks
#[derive(Debug)]
pub(crate) struct SessionShared {
    /// Lifecycle state; the driver writes, everyone reads
    state: Mutex<SessionState>,

    /// Most recent failure, kept until the next start
    last_error: Mutex<Option<ErrorInfo>>,

    /// Session event fan-out
    events: broadcast::Sender<SessionEvent>,

    /// Last produced step index
    step_index: AtomicU64,

    /// Last produced simulation time, stored as f64 bits
    time_bits: AtomicU64,

    /// Frames produced since start
    produced_total: AtomicU64,

    /// Parameter swaps applied since start
    parameter_updates: AtomicU64,

    /// Drops carried over from queues that have since been torn down
    dropped_carry: AtomicU64,

    /// Wall time per solver step
    solver_dt: Mutex<RunningStats>,
}

impl SessionShared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(SessionState::Idle),
            last_error: Mutex::new(None),
            events,
            step_index: AtomicU64::new(0),
            time_bits: AtomicU64::new(0),
            produced_total: AtomicU64::new(0),
            parameter_updates: AtomicU64::new(0),
            dropped_carry: AtomicU64::new(0),
            solver_dt: Mutex::new(RunningStats::default()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn transition(&self, to: SessionState) {
        let from = mem::replace(&mut *self.state.lock().unwrap(), to);
        if from != to {
            record_state_transition(from, to);
            self.emit(SessionEvent::StateChanged { from, to });
            debug!(%from, %to, "session state changed");
        }
    }

    /// Broadcast one event. No listeners is fine.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Record one published frame. The produced counter only moves forward
    /// here.
    pub(crate) fn note_produced(&self, step_index: u64, time_s: f64) {
        self.step_index.store(step_index, Ordering::Relaxed);
        self.time_bits.store(time_s.to_bits(), Ordering::Relaxed);
        self.produced_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Move the position back without touching the produced counter.
    pub(crate) fn rewind_to(&self, step_index: u64, time_s: f64) {
        self.step_index.store(step_index, Ordering::Relaxed);
        self.time_bits.store(time_s.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn step_index(&self) -> u64 {
        self.step_index.load(Ordering::Relaxed)
    }

    pub(crate) fn time_s(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn produced_total(&self) -> u64 {
        self.produced_total.load(Ordering::Relaxed)
    }

    pub(crate) fn note_parameter_update(&self) {
        self.parameter_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn parameter_updates(&self) -> u64 {
        self.parameter_updates.load(Ordering::Relaxed)
    }

    pub(crate) fn note_solver_step(&self, elapsed_ms: f64) {
        self.solver_dt.lock().unwrap().push(elapsed_ms);
    }

    pub(crate) fn set_last_error(&self, info: ErrorInfo) {
        *self.last_error.lock().unwrap() = Some(info);
    }

    fn last_error(&self) -> Option<ErrorInfo> {
        self.last_error.lock().unwrap().clone()
    }

    fn solver_dt(&self) -> TimingStats {
        TimingStats::from(&*self.solver_dt.lock().unwrap())
    }

    fn add_dropped_carry(&self, dropped: u64) {
        self.dropped_carry.fetch_add(dropped, Ordering::Relaxed);
    }

    fn dropped_carry(&self) -> u64 {
        self.dropped_carry.load(Ordering::Relaxed)
    }

    /// Zero the per-run counters for a fresh bind.
    fn reset_run(&self) {
        self.step_index.store(0, Ordering::Relaxed);
        self.time_bits.store(0, Ordering::Relaxed);
        self.produced_total.store(0, Ordering::Relaxed);
        self.parameter_updates.store(0, Ordering::Relaxed);
        self.dropped_carry.store(0, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = None;
        *self.solver_dt.lock().unwrap() = RunningStats::default();
    }
}

/// How produced frames reach consumers for the bound run
#[derive(Debug)]
enum FanOut {
    /// Dispatcher fan-out with per-subscription queues
    Live {
        dispatcher: FanoutDispatcher,
        task: JoinHandle<()>,
    },

    /// The production queue goes straight to the handle `replay` returned
    Replay,
}

/// Everything tied to one bound stepper, torn down on stop
#[derive(Debug)]
struct Runtime {
    commands: Sender<DriverCommand>,
    driver: Option<thread::JoinHandle<()>>,
    fan_out: FanOut,
    production_metrics: Arc<QueueMetrics>,
}

/// Ticket for a capture in progress; redeem with [`Session::capture_end`]
#[derive(Debug)]
pub struct CaptureHandle {
    id: SubscriptionId,
    path: PathBuf,
    done: oneshot::Receiver<Result<CaptureArtifact, StreamError>>,
}

impl CaptureHandle {
    /// Directory the artifact is being written into.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Drains the capture subscription to disk until its queue closes
struct RecorderTask {
    subscription: FrameStreamHandle,
    writer: CaptureWriter,
    shared: Arc<SessionShared>,
    dispatcher: FanoutDispatcher,
    production_metrics: Arc<QueueMetrics>,
    /// Session-wide drop total when the capture began
    dropped_before: u64,
    /// Parameter update total when the capture began
    updates_before: u64,
}

impl RecorderTask {
    async fn run(mut self, done: oneshot::Sender<Result<CaptureArtifact, StreamError>>) {
        let mut failure = None;
        while let Some(envelope) = self.subscription.next_envelope().await {
            if let Err(e) = self.writer.append(&envelope.frame) {
                error!(error = %e, "capture append failed, abandoning recording");
                failure = Some(e);
                break;
            }
        }

        let result = match failure {
            Some(e) => Err(e),
            None => self.finalize(),
        };
        if done.send(result).is_err() {
            debug!("capture finished with no caller waiting");
        }
    }

    /// Stamp the drop and parameter-update deltas, then seal the artifact.
    fn finalize(mut self) -> Result<CaptureArtifact, StreamError> {
        let dropped = self
            .session_dropped_total()
            .saturating_sub(self.dropped_before);
        self.writer.set_dropped_during_capture(dropped);

        let updates = self
            .shared
            .parameter_updates()
            .saturating_sub(self.updates_before);
        self.writer.set_parameter_updates(updates);

        self.writer.finish()
    }

    fn session_dropped_total(&self) -> u64 {
        self.production_metrics.snapshot().frames_dropped + self.dispatcher.dropped_total()
    }
}

/// Control-plane facade for one solver run
///
/// Dropping the session disconnects the command channel, which the driver
/// thread treats as a stop.
#[derive(Debug)]
pub struct Session {
    shared: Arc<SessionShared>,
    runtime: Option<Runtime>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with no stepper bound.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SessionShared::new()),
            runtime: None,
        }
    }

    /// Bind a stepper and begin producing frames.
    ///
    /// The session comes up `Running`; callers that want to start held
    /// call [`Session::pause`] right after.
    #[instrument(
        name = "session_start",
        skip(self, stepper, config),
        fields(stepper = %stepper.name())
    )]
    pub fn start(
        &mut self,
        stepper: Box<dyn FrameStepper>,
        config: SessionConfig,
    ) -> Result<(), StreamError> {
        if self.runtime.is_some() {
            return Err(StreamError::configuration(
                "session",
                "a stepper is already bound; stop the session first",
            ));
        }
        config.validate()?;
        self.shared.reset_run();

        let (production_tx, production_rx) = bounded(
            "production",
            QueueConfig::new(config.queue_depth, config.drop_policy),
        );
        let production_metrics = production_tx.metrics();

        let dispatcher = FanoutDispatcher::with_latency_window(config.latency_window);
        let task = dispatcher.spawn(production_rx);

        let (command_tx, command_rx) = mpsc::channel();
        let driver = Driver::new(
            stepper,
            config,
            production_tx,
            command_rx,
            self.shared.clone(),
            FeedMode::Live,
        );

        // Before the spawn, so the driver's first state read does not see
        // Idle and quit.
        self.shared.transition(SessionState::Running);

        let thread = match thread::Builder::new()
            .name("session-driver".into())
            .spawn(move || driver.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                // The dropped driver closed the production queue, so the
                // fan-out task drains and exits on its own.
                self.shared.transition(SessionState::Idle);
                return Err(StreamError::Io(e));
            }
        };

        self.runtime = Some(Runtime {
            commands: command_tx,
            driver: Some(thread),
            fan_out: FanOut::Live { dispatcher, task },
            production_metrics,
        });
        record_session_event("started");
        info!("session started");
        Ok(())
    }

    /// Bind a recorded artifact and stream it back losslessly.
    ///
    /// Replay bypasses the fan-out dispatcher: the production queue goes
    /// straight to the returned handle, unprojected, so recorded hashes
    /// stay verifiable. Playback control works the same as a live run,
    /// but a full queue parks the frame instead of dropping it.
    #[instrument(name = "session_replay", skip(self, artifact, config))]
    pub fn replay(
        &mut self,
        artifact: &CaptureArtifact,
        config: SessionConfig,
    ) -> Result<FrameStreamHandle, StreamError> {
        if self.runtime.is_some() {
            return Err(StreamError::configuration(
                "session",
                "a stepper is already bound; stop the session first",
            ));
        }
        config.validate()?;

        let stepper = Box::new(ReplayStepper::open(artifact.root())?);
        self.shared.reset_run();

        let (production_tx, production_rx) = bounded(
            "replay",
            QueueConfig::new(config.queue_depth, config.drop_policy),
        );
        let production_metrics = production_tx.metrics();

        let spec = SubscriptionSpec::new("replay")
            .with_fields(FieldsMask::all())
            .with_contact()
            .with_probes()
            .with_queue_depth(config.queue_depth);
        let handle = FrameStreamHandle::direct(spec, production_rx, config.latency_window);

        let (command_tx, command_rx) = mpsc::channel();
        let driver = Driver::new(
            stepper,
            config,
            production_tx,
            command_rx,
            self.shared.clone(),
            FeedMode::Replay,
        );

        self.shared.transition(SessionState::Running);

        let thread = match thread::Builder::new()
            .name("session-replay".into())
            .spawn(move || driver.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                self.shared.transition(SessionState::Idle);
                return Err(StreamError::Io(e));
            }
        };

        self.runtime = Some(Runtime {
            commands: command_tx,
            driver: Some(thread),
            fan_out: FanOut::Replay,
            production_metrics,
        });
        record_session_event("replay_started");
        info!(path = %artifact.root().display(), "replay started");
        Ok(handle)
    }

    /// Send one command to the driver and wait for its reply.
    async fn call<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(ReplyTx<T>) -> DriverCommand,
    ) -> Result<T, StreamError> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime,
            None => {
                return Err(StreamError::invalid_transition(operation, self.shared.state()));
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if runtime.commands.send(build(reply_tx)).is_err() {
            return Err(StreamError::SessionClosed);
        }
        reply_rx.await.map_err(|_| StreamError::SessionClosed)?
    }

    /// Resume continuous playback. No-op while already running.
    pub async fn play(&self) -> Result<(), StreamError> {
        self.call("play", DriverCommand::Play).await
    }

    /// Hold playback at the current frame. No-op while already paused.
    pub async fn pause(&self) -> Result<(), StreamError> {
        self.call("pause", DriverCommand::Pause).await
    }

    /// Advance exactly one full-fidelity frame. Only valid while paused.
    pub async fn step(&self) -> Result<(), StreamError> {
        self.call("step", DriverCommand::StepOnce).await
    }

    /// Aim the stream at `time_s`.
    ///
    /// `Coarse` asks for preview-quality progress frames while a scrub
    /// gesture is in motion; `Refine` settles exactly on the target at
    /// full fidelity and restores the pre-seek playback state. A newer
    /// seek supersedes an unfinished one.
    pub async fn seek(&self, time_s: f64, hint: QualityHint) -> Result<(), StreamError> {
        self.call("seek", |reply| DriverCommand::Seek { time_s, hint, reply })
            .await
    }

    /// Swap solver parameters at the next step barrier.
    pub async fn update_parameters(&self, params: ParameterSet) -> Result<(), StreamError> {
        params.validate()?;
        self.call("update_parameters", |reply| DriverCommand::UpdateParameters {
            params,
            reply,
        })
        .await
    }

    /// Recover from the error state by restoring the most recent
    /// checkpoint. Returns the step index the session rolled back to; the
    /// session comes back paused.
    pub async fn rollback(&self) -> Result<u64, StreamError> {
        self.call("rollback", DriverCommand::Rollback).await
    }

    /// Register a live frame subscriber.
    ///
    /// Each subscriber gets a private bounded queue, so a slow consumer
    /// sheds its own frames and nobody else's.
    pub fn subscribe_frames(
        &self,
        spec: SubscriptionSpec,
    ) -> Result<FrameStreamHandle, StreamError> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime,
            None => {
                return Err(StreamError::invalid_transition(
                    "subscribe_frames",
                    self.shared.state(),
                ));
            }
        };
        let dispatcher = match &runtime.fan_out {
            FanOut::Live { dispatcher, .. } => dispatcher,
            FanOut::Replay => {
                return Err(StreamError::configuration(
                    "subscription",
                    "a replay session streams through the handle returned by replay()",
                ));
            }
        };

        let handle = dispatcher.subscribe(spec)?;
        self.shared.emit(SessionEvent::SubscriberAdded {
            label: handle.label().to_string(),
        });
        record_session_event("subscriber_added");
        Ok(handle)
    }

    /// Remove a subscription. Returns `false` when it was already gone.
    pub fn unsubscribe(&self, handle: &FrameStreamHandle) -> bool {
        let dispatcher = match &self.runtime {
            Some(Runtime {
                fan_out: FanOut::Live { dispatcher, .. },
                ..
            }) => dispatcher,
            _ => return false,
        };

        let removed = dispatcher.unsubscribe(handle.id());
        if removed {
            self.shared.emit(SessionEvent::SubscriberRemoved {
                label: handle.label().to_string(),
            });
            record_session_event("subscriber_removed");
        }
        removed
    }

    /// Start recording every produced frame into `dir`.
    ///
    /// The recorder rides a deep internal subscription; frames shed at the
    /// production queue before reaching it are counted in the manifest as
    /// dropped during capture.
    #[instrument(name = "session_capture_begin", skip(self, dir))]
    pub async fn capture_begin(
        &self,
        dir: impl Into<PathBuf>,
    ) -> Result<CaptureHandle, StreamError> {
        let (dispatcher, production_metrics) = match &self.runtime {
            Some(Runtime {
                fan_out: FanOut::Live { dispatcher, .. },
                production_metrics,
                ..
            }) => (dispatcher.clone(), production_metrics.clone()),
            Some(_) => {
                return Err(StreamError::configuration(
                    "capture",
                    "a replay session cannot be captured again",
                ));
            }
            None => {
                return Err(StreamError::invalid_transition(
                    "capture_begin",
                    self.shared.state(),
                ));
            }
        };

        let description = self.call("capture_begin", DriverCommand::Describe).await?;
        let path = dir.into();
        let writer = CaptureWriter::create(path.clone(), description.name, description.parameters)?;

        let spec = SubscriptionSpec::new("capture")
            .with_fields(FieldsMask::all())
            .with_contact()
            .with_probes()
            .with_queue_depth(CAPTURE_QUEUE_DEPTH);
        let subscription = dispatcher.subscribe(spec)?;
        let id = subscription.id();

        let dropped_before =
            production_metrics.snapshot().frames_dropped + dispatcher.dropped_total();
        let updates_before = self.shared.parameter_updates();

        let (done_tx, done_rx) = oneshot::channel();
        let recorder = RecorderTask {
            subscription,
            writer,
            shared: self.shared.clone(),
            dispatcher,
            production_metrics,
            dropped_before,
            updates_before,
        };
        tokio::spawn(recorder.run(done_tx));

        self.shared.emit(SessionEvent::CaptureStarted {
            path: path.display().to_string(),
        });
        record_session_event("capture_started");
        info!(path = %path.display(), "capture started");

        Ok(CaptureHandle {
            id,
            path,
            done: done_rx,
        })
    }

    /// Finish a capture and seal its artifact.
    ///
    /// Frames already queued for the recorder are flushed to disk before
    /// the manifest is written.
    #[instrument(
        name = "session_capture_end",
        skip(self, handle),
        fields(path = %handle.path.display())
    )]
    pub async fn capture_end(&self, handle: CaptureHandle) -> Result<CaptureArtifact, StreamError> {
        if let Some(Runtime {
            fan_out: FanOut::Live { dispatcher, .. },
            ..
        }) = &self.runtime
        {
            dispatcher.unsubscribe(handle.id);
        }

        let artifact = match handle.done.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::Other(
                    "capture recorder exited without finalizing".into(),
                ));
            }
        };

        self.shared.emit(SessionEvent::CaptureFinished {
            path: handle.path.display().to_string(),
            frame_count: artifact.manifest().frame_count,
        });
        record_session_event("capture_finished");
        info!(
            path = %handle.path.display(),
            frames = artifact.manifest().frame_count,
            "capture finished"
        );
        Ok(artifact)
    }

    /// Assemble one diagnostics snapshot.
    ///
    /// `dropped_total` sums the production queue, every subscription past
    /// and present, and already-stopped runtimes; it only ever grows until
    /// the next start.
    pub fn get_diagnostics(&self) -> DiagnosticsSnapshot {
        let mut dropped_total = self.shared.dropped_carry();
        let mut subscriptions = Vec::new();

        if let Some(runtime) = &self.runtime {
            dropped_total += runtime.production_metrics.snapshot().frames_dropped;
            if let FanOut::Live { dispatcher, .. } = &runtime.fan_out {
                dropped_total += dispatcher.dropped_total();
                subscriptions = dispatcher.diagnostics();
            }
        }

        DiagnosticsSnapshot {
            state: self.shared.state(),
            step_index: self.shared.step_index(),
            time_s: self.shared.time_s(),
            solver_dt: self.shared.solver_dt(),
            produced_total: self.shared.produced_total(),
            dropped_total,
            subscriptions,
        }
    }

    /// Most recent failure, kept until the next start.
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.shared.last_error()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Subscribe to session events. A slow listener loses oldest events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.subscribe_events()
    }

    /// Stop the driver, tear down the runtime, and return to `Idle`.
    ///
    /// Counters survive into [`Session::get_diagnostics`] until the next
    /// start; frames already queued on subscriber handles stay poppable.
    #[instrument(name = "session_stop", skip(self))]
    pub async fn stop(&mut self) -> Result<(), StreamError> {
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => {
                return Err(StreamError::invalid_transition("stop", self.shared.state()));
            }
        };
        let Runtime {
            commands,
            driver,
            fan_out,
            production_metrics,
        } = runtime;

        let (reply_tx, reply_rx) = oneshot::channel();
        if commands.send(DriverCommand::Stop(reply_tx)).is_ok() {
            // The driver may already be gone; either way it is stopping.
            let _ = reply_rx.await;
        }
        drop(commands);

        if let Some(thread) = driver {
            if thread.join().is_err() {
                error!("session driver thread panicked during stop");
            }
        }
        // Normally a no-op; covers a driver that died without cleaning up.
        self.shared.transition(SessionState::Idle);

        match fan_out {
            FanOut::Live { dispatcher, task } => {
                if task.await.is_err() {
                    error!("dispatcher task panicked during stop");
                }
                self.shared.add_dropped_carry(dispatcher.dropped_total());
            }
            FanOut::Replay => {}
        }
        self.shared
            .add_dropped_carry(production_metrics.snapshot().frames_dropped);

        info!("session stopped");
        Ok(())
    }
}
