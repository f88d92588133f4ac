//! The driver thread: owns the stepper, services commands, publishes frames
//!
//! One dedicated OS thread per bound stepper. Commands arrive on a channel
//! and are answered over oneshot replies, so the solver never shares a lock
//! with the API. Frames leave through the bounded production queue; the
//! live feed sheds per the drop policy while the replay feed parks and
//! retries so nothing recorded is ever lost.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, trace};

use contracts::{
    ErrorInfo, Fidelity, Frame, FrameFlags, FrameStepper, ParameterSet, QualityHint,
    SessionConfig, SessionEvent, SessionState, StepOutcome, StepperCheckpoint, StreamError,
};
use frame_queue::{DeliveryEnvelope, FrameProducer, PushOutcome, TryPushError};
use observability::metrics::{
    record_frame_dropped, record_frame_produced, record_queue_depth, record_seek_settle_ms,
    record_session_event, record_solver_step_ms,
};

use crate::scrub::{ScrubController, SeekRequest};
use crate::session::SessionShared;
use crate::transitions::{self, Toggle};

/// Retry interval while the replay queue is full; commands stay serviced
/// at this cadence.
const REPLAY_POLL: Duration = Duration::from_millis(1);

/// Reply channel for one command
pub(crate) type ReplyTx<T> = oneshot::Sender<Result<T, StreamError>>;

/// Identity snapshot stamped into capture manifests
#[derive(Debug)]
pub(crate) struct StepperDescription {
    pub name: String,
    pub parameters: ParameterSet,
}

/// Commands accepted by the driver thread
#[derive(Debug)]
pub(crate) enum DriverCommand {
    Play(ReplyTx<()>),
    Pause(ReplyTx<()>),
    StepOnce(ReplyTx<()>),
    Seek {
        time_s: f64,
        hint: QualityHint,
        reply: ReplyTx<()>,
    },
    UpdateParameters {
        params: ParameterSet,
        reply: ReplyTx<()>,
    },
    Rollback(ReplyTx<u64>),
    Describe(ReplyTx<StepperDescription>),
    Stop(ReplyTx<()>),
}

impl DriverCommand {
    fn name(&self) -> &'static str {
        match self {
            DriverCommand::Play(_) => "play",
            DriverCommand::Pause(_) => "pause",
            DriverCommand::StepOnce(_) => "step",
            DriverCommand::Seek { .. } => "seek",
            DriverCommand::UpdateParameters { .. } => "update_parameters",
            DriverCommand::Rollback(_) => "rollback",
            DriverCommand::Describe(_) => "describe",
            DriverCommand::Stop(_) => "stop",
        }
    }
}

/// How frames leave the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeedMode {
    /// Real-time feed; a full production queue applies its drop policy
    Live,
    /// Lossless feed; a full queue parks the frame and retries
    Replay,
}

/// Whether the driver loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Whether the stream can still accept frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publish {
    /// Queued, or parked for a lossless retry
    Accepted,
    /// Every consumer is gone; producing more is pointless
    Ended,
}

/// Outcome of one parked-frame delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingFlush {
    /// Nothing parked any more
    Clear,
    /// Still waiting for queue space
    Parked,
    /// The consumer side is gone
    Gone,
}

pub(crate) struct Driver {
    stepper: Box<dyn FrameStepper>,
    config: SessionConfig,
    production: FrameProducer,
    commands: Receiver<DriverCommand>,
    shared: Arc<SessionShared>,
    scrub: ScrubController,
    mode: FeedMode,
    /// Most recent checkpoint; rollback target
    last_checkpoint: Option<StepperCheckpoint>,
    /// Frame awaiting queue space in lossless mode
    pending: Option<DeliveryEnvelope>,
    /// Pacing period derived from `target_step_rate_hz`
    step_period: Option<Duration>,
    /// Deadline for the next paced step
    next_step_at: Instant,
}

impl Driver {
    pub(crate) fn new(
        stepper: Box<dyn FrameStepper>,
        config: SessionConfig,
        production: FrameProducer,
        commands: Receiver<DriverCommand>,
        shared: Arc<SessionShared>,
        mode: FeedMode,
    ) -> Self {
        let step_period = match mode {
            FeedMode::Live => config
                .target_step_rate_hz
                .map(|hz| Duration::from_secs_f64(1.0 / hz)),
            // Replay pacing is the consumer's pop rate, not a timer.
            FeedMode::Replay => None,
        };
        Self {
            scrub: ScrubController::new(config.scrub),
            stepper,
            config,
            production,
            commands,
            shared,
            mode,
            last_checkpoint: None,
            pending: None,
            step_period,
            next_step_at: Instant::now(),
        }
    }

    /// Run until stopped. Closes the production queue on the way out so
    /// every consumer sees end-of-stream.
    #[instrument(
        name = "session_driver",
        skip(self),
        fields(stepper = %self.stepper.name(), mode = ?self.mode)
    )]
    pub(crate) fn run(mut self) {
        info!("session driver started");

        // Step 0 checkpoint so rollback always has a target.
        self.last_checkpoint = Some(self.stepper.checkpoint());

        loop {
            let flow = match self.shared.state() {
                SessionState::Running => self.running_tick(),
                SessionState::Seeking => self.seeking_tick(),
                SessionState::Paused | SessionState::Error => self.wait_for_command(),
                SessionState::Idle => Flow::Shutdown,
            };
            if flow == Flow::Shutdown {
                break;
            }
        }

        self.production.close();
        info!("session driver stopped");
    }

    /// One iteration of continuous playback.
    fn running_tick(&mut self) -> Flow {
        if self.drain_commands() == Flow::Shutdown {
            return Flow::Shutdown;
        }
        if self.shared.state() != SessionState::Running {
            return Flow::Continue;
        }

        // A parked lossless frame blocks new steps until it goes out.
        if self.pending.is_some() {
            return match self.try_flush_pending() {
                PendingFlush::Clear => Flow::Continue,
                PendingFlush::Parked => self.wait_for_command_until(Instant::now() + REPLAY_POLL),
                PendingFlush::Gone => self.consumers_gone(),
            };
        }

        if let Some(flow) = self.pace() {
            return flow;
        }

        match self.advance(Fidelity::Full) {
            Ok(flow) => flow,
            Err(error) => {
                self.enter_error(&error);
                Flow::Continue
            }
        }
    }

    /// Hold until the pacing deadline, servicing commands meanwhile.
    /// `None` means a step is due now.
    fn pace(&mut self) -> Option<Flow> {
        let period = self.step_period?;
        let now = Instant::now();
        if now < self.next_step_at {
            return Some(self.wait_for_command_until(self.next_step_at));
        }
        // A late wakeup advances the deadline from now, not from the missed
        // slot, so a stall does not burst.
        self.next_step_at = if now > self.next_step_at + period {
            now + period
        } else {
            self.next_step_at + period
        };
        None
    }

    /// Advance the stepper once and publish the frame.
    fn advance(&mut self, fidelity: Fidelity) -> Result<Flow, StreamError> {
        let started = Instant::now();
        let outcome = self.stepper.step(fidelity)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        record_solver_step_ms(elapsed_ms);
        self.shared.note_solver_step(elapsed_ms);

        let mut frame = match outcome {
            StepOutcome::Frame(frame) => frame,
            StepOutcome::Finished => {
                self.finish_stream();
                return Ok(Flow::Continue);
            }
        };

        if frame.meta.step_index.is_multiple_of(self.config.checkpoint_interval) {
            frame.meta.flags.insert(FrameFlags::IS_KEYFRAME);
            self.last_checkpoint = Some(self.stepper.checkpoint());
            trace!(step = frame.meta.step_index, "checkpoint taken");
        }

        match self.publish(frame)? {
            Publish::Accepted => Ok(Flow::Continue),
            Publish::Ended => Ok(self.consumers_gone()),
        }
    }

    /// Seal and ship one frame according to the feed mode.
    fn publish(&mut self, mut frame: Frame) -> Result<Publish, StreamError> {
        frame_codec::seal(&mut frame)?;
        let step_index = frame.meta.step_index;
        let time_s = frame.meta.time_s;
        let preview = frame.meta.flags.contains(FrameFlags::PREVIEW);
        let envelope = DeliveryEnvelope::new(frame);

        match self.mode {
            FeedMode::Live => {
                let outcome = self.production.push(envelope);
                if outcome == PushOutcome::Closed {
                    return Ok(Publish::Ended);
                }
                if outcome.dropped_frame() {
                    record_frame_dropped("production");
                }
            }
            FeedMode::Replay => match self.production.try_push(envelope) {
                Ok(()) => {}
                Err(TryPushError::Full(envelope)) => {
                    // Parked; the running loop retries without losing it.
                    self.pending = Some(envelope);
                    return Ok(Publish::Accepted);
                }
                Err(TryPushError::Closed(_)) => return Ok(Publish::Ended),
            },
        }

        self.note_published(step_index, time_s, preview);
        Ok(Publish::Accepted)
    }

    /// One delivery attempt for the parked lossless frame.
    fn try_flush_pending(&mut self) -> PendingFlush {
        let envelope = match self.pending.take() {
            Some(envelope) => envelope,
            None => return PendingFlush::Clear,
        };
        let step_index = envelope.frame.meta.step_index;
        let time_s = envelope.frame.meta.time_s;
        let preview = envelope.frame.meta.flags.contains(FrameFlags::PREVIEW);

        match self.production.try_push(envelope) {
            Ok(()) => {
                self.note_published(step_index, time_s, preview);
                PendingFlush::Clear
            }
            Err(TryPushError::Full(envelope)) => {
                self.pending = Some(envelope);
                PendingFlush::Parked
            }
            Err(TryPushError::Closed(_)) => PendingFlush::Gone,
        }
    }

    fn note_published(&self, step_index: u64, time_s: f64, preview: bool) {
        self.shared.note_produced(step_index, time_s);
        record_frame_produced(step_index, preview);
        record_queue_depth("production", self.production.len());
    }

    fn consumers_gone(&mut self) -> Flow {
        info!("frame consumers gone, winding down");
        self.transition(SessionState::Idle);
        Flow::Shutdown
    }

    /// The stepper has no more frames; end the stream but keep the session.
    fn finish_stream(&mut self) {
        info!(step = self.stepper.current_step(), "stepper finished, stream complete");
        self.production.close();
        record_session_event("stream_finished");
        self.transition(SessionState::Paused);
    }

    /// One iteration of seek servicing.
    fn seeking_tick(&mut self) -> Flow {
        if self.drain_commands() == Flow::Shutdown {
            return Flow::Shutdown;
        }
        if self.shared.state() != SessionState::Seeking {
            return Flow::Continue;
        }

        let request = match self.scrub.target() {
            Some(request) => request,
            // Parked at a coarse target; wait for a retarget or the settle.
            None => return self.wait_for_command(),
        };

        match request.hint {
            QualityHint::Coarse => self.coarse_chunk(request),
            QualityHint::Refine => self.refine_settle(),
        }
    }

    /// Skip-step one chunk toward the coarse target, publishing a preview
    /// when the queue has room for it.
    fn coarse_chunk(&mut self, request: SeekRequest) -> Flow {
        let progress = match self
            .stepper
            .seek_chunk(request.time_s, self.scrub.stride(), Fidelity::Preview)
        {
            Ok(progress) => progress,
            Err(error) => {
                self.enter_error(&error);
                return Flow::Continue;
            }
        };

        if progress.reached {
            // At the target; previews stop until the pointer moves again
            // or the gesture settles with a refine.
            self.scrub.take_target();
        }

        if self.scrub.admit_preview(self.production.len()) {
            match self.publish(progress.frame) {
                Ok(Publish::Accepted) => {}
                Ok(Publish::Ended) => return self.consumers_gone(),
                Err(error) => {
                    self.enter_error(&error);
                    return Flow::Continue;
                }
            }
        } else {
            // Queue already at the coarse ceiling; shed this preview.
            self.production.metrics().record_dropped();
            record_frame_dropped("production");
            debug!(time_s = request.time_s, "preview skipped, queue at coarse depth");
        }
        Flow::Continue
    }

    /// Land exactly on the settle target at full fidelity, checkpoint
    /// there, and restore the pre-seek playback state.
    fn refine_settle(&mut self) -> Flow {
        let request = match self.scrub.take_target() {
            Some(request) => request,
            None => return Flow::Continue,
        };

        let started = Instant::now();
        let mut frame = match self.stepper.refine_to(request.time_s) {
            Ok(frame) => frame,
            Err(error) => {
                self.enter_error(&error);
                return Flow::Continue;
            }
        };

        frame.meta.flags.insert(FrameFlags::IS_KEYFRAME);
        self.last_checkpoint = Some(self.stepper.checkpoint());

        match self.publish(frame) {
            Ok(Publish::Accepted) => {}
            Ok(Publish::Ended) => return self.consumers_gone(),
            Err(error) => {
                self.enter_error(&error);
                return Flow::Continue;
            }
        }

        let settle_ms = started.elapsed().as_secs_f64() * 1e3;
        record_seek_settle_ms(settle_ms);
        self.shared.emit(SessionEvent::SeekSettled {
            time_s: self.stepper.current_time(),
            step_index: self.stepper.current_step(),
        });
        record_session_event("seek_settled");
        debug!(time_s = request.time_s, settle_ms, "seek settled");

        self.transition(self.scrub.resume_state());
        Flow::Continue
    }

    /// Block until a command arrives; holds burn no CPU.
    fn wait_for_command(&mut self) -> Flow {
        match self.commands.recv() {
            Ok(command) => self.handle_command(command),
            // Every sender gone means the session handle was dropped.
            Err(_) => {
                self.transition(SessionState::Idle);
                Flow::Shutdown
            }
        }
    }

    fn wait_for_command_until(&mut self, deadline: Instant) -> Flow {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match self.commands.recv_timeout(timeout) {
            Ok(command) => self.handle_command(command),
            Err(RecvTimeoutError::Timeout) => Flow::Continue,
            Err(RecvTimeoutError::Disconnected) => {
                self.transition(SessionState::Idle);
                Flow::Shutdown
            }
        }
    }

    /// Service everything already queued without blocking.
    fn drain_commands(&mut self) -> Flow {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if self.handle_command(command) == Flow::Shutdown {
                        return Flow::Shutdown;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => {
                    self.transition(SessionState::Idle);
                    return Flow::Shutdown;
                }
            }
        }
    }

    #[instrument(
        name = "session_command",
        level = "debug",
        skip(self, command),
        fields(command = command.name(), state = %self.shared.state())
    )]
    fn handle_command(&mut self, command: DriverCommand) -> Flow {
        match command {
            DriverCommand::Play(reply) => {
                let result = self.toggle_playback(SessionState::Running, transitions::play);
                let _ = reply.send(result);
                Flow::Continue
            }
            DriverCommand::Pause(reply) => {
                let result = self.toggle_playback(SessionState::Paused, transitions::pause);
                let _ = reply.send(result);
                Flow::Continue
            }
            DriverCommand::StepOnce(reply) => self.step_once(reply),
            DriverCommand::Seek { time_s, hint, reply } => {
                let _ = reply.send(self.accept_seek(time_s, hint));
                Flow::Continue
            }
            DriverCommand::UpdateParameters { params, reply } => {
                let _ = reply.send(self.apply_parameters(&params));
                Flow::Continue
            }
            DriverCommand::Rollback(reply) => {
                let _ = reply.send(self.rollback());
                Flow::Continue
            }
            DriverCommand::Describe(reply) => {
                let _ = reply.send(Ok(StepperDescription {
                    name: self.stepper.name().to_string(),
                    parameters: self.stepper.parameters(),
                }));
                Flow::Continue
            }
            DriverCommand::Stop(reply) => {
                self.transition(SessionState::Idle);
                record_session_event("stopped");
                let _ = reply.send(Ok(()));
                Flow::Shutdown
            }
        }
    }

    fn toggle_playback(
        &mut self,
        to: SessionState,
        guard: fn(SessionState) -> Result<Toggle, StreamError>,
    ) -> Result<(), StreamError> {
        match guard(self.shared.state())? {
            Toggle::NoOp => Ok(()),
            Toggle::Switch => {
                self.transition(to);
                Ok(())
            }
            Toggle::Defer => {
                // Mid-seek: the settle lands in the requested state instead.
                self.scrub.set_resume(to);
                Ok(())
            }
        }
    }

    fn step_once(&mut self, reply: ReplyTx<()>) -> Flow {
        if let Err(error) = transitions::step(self.shared.state()) {
            let _ = reply.send(Err(error));
            return Flow::Continue;
        }

        if self.pending.is_some() {
            // The parked frame already is the one outstanding step.
            return match self.try_flush_pending() {
                PendingFlush::Clear | PendingFlush::Parked => {
                    let _ = reply.send(Ok(()));
                    Flow::Continue
                }
                PendingFlush::Gone => {
                    let _ = reply.send(Err(StreamError::SessionClosed));
                    self.consumers_gone()
                }
            };
        }

        match self.advance(Fidelity::Full) {
            Ok(flow) => {
                let _ = reply.send(Ok(()));
                flow
            }
            Err(error) => {
                self.enter_error(&error);
                let _ = reply.send(Err(error));
                Flow::Continue
            }
        }
    }

    fn accept_seek(&mut self, time_s: f64, hint: QualityHint) -> Result<(), StreamError> {
        let state = self.shared.state();
        transitions::seek(state)?;

        if !time_s.is_finite() || time_s < 0.0 {
            return Err(StreamError::configuration(
                "seek.time_s",
                format!("seek target must be a non-negative finite time, got {time_s}"),
            ));
        }

        // A parked replay frame predates the jump; the seek supersedes it.
        self.pending = None;

        let request = SeekRequest { time_s, hint };
        if state == SessionState::Seeking {
            self.scrub.retarget(request);
        } else {
            self.scrub.begin(request, state);
            self.transition(SessionState::Seeking);
        }
        Ok(())
    }

    /// Swap parameters at the step barrier between two frames.
    fn apply_parameters(&mut self, params: &ParameterSet) -> Result<(), StreamError> {
        transitions::update_parameters(self.shared.state())?;
        self.stepper.apply_parameters(params)?;

        let step_index = self.stepper.current_step();
        self.shared.note_parameter_update();
        self.shared.emit(SessionEvent::ParametersApplied { step_index });
        record_session_event("parameters_applied");
        debug!(step = step_index, count = params.len(), "parameters applied at step barrier");
        Ok(())
    }

    /// Restore the most recent checkpoint and come back paused.
    fn rollback(&mut self) -> Result<u64, StreamError> {
        transitions::rollback(self.shared.state())?;

        let checkpoint = self
            .last_checkpoint
            .as_ref()
            .ok_or_else(|| StreamError::stepper_fault("no checkpoint available to roll back to"))?;
        self.stepper.restore(checkpoint)?;
        let to_step = checkpoint.step_index;
        let time_s = checkpoint.time_s;

        // A parked frame is from the abandoned timeline.
        self.pending = None;

        self.shared.rewind_to(to_step, time_s);
        self.shared.emit(SessionEvent::RolledBack { to_step });
        record_session_event("rolled_back");
        info!(to_step, "rolled back to checkpoint");
        self.transition(SessionState::Paused);
        Ok(to_step)
    }

    /// Record the failure, announce divergence when that is what it was,
    /// and hold in the error state for a rollback.
    fn enter_error(&mut self, error: &StreamError) {
        let step_index = match error {
            StreamError::SolverDivergence { step_index, .. } => *step_index,
            _ => self.stepper.current_step(),
        };
        error!(step = step_index, %error, "session entered error state");
        self.shared.set_last_error(ErrorInfo::at_step(step_index, error));

        if let StreamError::SolverDivergence { step_index, message } = error {
            self.shared.emit(SessionEvent::Diverged {
                step_index: *step_index,
                message: message.clone(),
            });
            record_session_event("diverged");
        } else {
            record_session_event("stepper_fault");
        }
        self.transition(SessionState::Error);

        // A replay fault is terminal: every later record sits past the bad
        // one, so the stream ends here and consumers drain out instead of
        // waiting on frames that cannot come.
        if self.mode == FeedMode::Replay {
            self.production.close();
        }
    }

    /// Move lifecycle state, restarting pacing when playback resumes.
    fn transition(&mut self, to: SessionState) {
        self.shared.transition(to);
        if to == SessionState::Running {
            self.next_step_at = Instant::now();
        }
    }
}
