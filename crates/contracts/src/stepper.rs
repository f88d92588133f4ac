//! FrameStepper trait - solver abstraction
//!
//! The numerical solver behind a session is opaque: the control plane only
//! needs it to advance, seek, checkpoint, and accept parameters. Live
//! steppers and capture replay implement the same trait, so the session
//! pipeline downstream of the driver is identical for both.

use bytes::Bytes;

use crate::{Frame, ParameterSet, StreamError};

/// Fidelity requested for the next produced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// All sections the stepper can produce
    Full,
    /// Displacements and topology only; optional sections omitted
    Preview,
}

/// Result of advancing a stepper.
#[derive(Debug)]
pub enum StepOutcome {
    /// The next frame, with a zeroed `state_hash` (the driver seals it)
    Frame(Frame),
    /// The stream is exhausted (replay reached the end of its artifact)
    Finished,
}

/// Progress of one bounded seek chunk.
#[derive(Debug)]
pub struct SeekProgress {
    /// Frame at the position reached by this chunk
    pub frame: Frame,

    /// True once the stepper will not move closer to the target
    pub reached: bool,
}

/// Opaque stepper state snapshot.
///
/// The payload encoding belongs to the stepper; the control plane only
/// stores and returns it.
#[derive(Debug, Clone)]
pub struct StepperCheckpoint {
    /// Step the snapshot was taken at
    pub step_index: u64,

    /// Simulation time the snapshot was taken at
    pub time_s: f64,

    /// Stepper-defined state blob
    pub payload: Bytes,
}

/// Solver stepping abstraction
///
/// Called only from the session driver thread, so implementations may block
/// on their own computation. The driver owns the instance for the lifetime
/// of a run and drops it on `stop`.
///
/// # Example
///
/// ```ignore
/// let mut stepper: Box<dyn FrameStepper> = build_stepper();
/// match stepper.step(Fidelity::Full)? {
///     StepOutcome::Frame(frame) => publish(frame),
///     StepOutcome::Finished => shutdown(),
/// }
/// ```
pub trait FrameStepper: Send {
    /// Stepper name (used for logging/diagnostics).
    fn name(&self) -> &str;

    /// Simulation time of the last produced frame.
    fn current_time(&self) -> f64;

    /// Step index of the last produced frame.
    fn current_step(&self) -> u64;

    /// Current externally-visible parameter values.
    ///
    /// Recorded into capture manifests so an artifact names the exact
    /// parameters it ran with.
    fn parameters(&self) -> ParameterSet;

    /// Replace the active parameter set.
    ///
    /// Called only between steps; no frame may observe a partial update.
    fn apply_parameters(&mut self, params: &ParameterSet) -> Result<(), StreamError>;

    /// Advance exactly one step and produce its frame.
    fn step(&mut self, fidelity: Fidelity) -> Result<StepOutcome, StreamError>;

    /// Move up to `stride` steps toward `time_s` and produce one frame at
    /// the stopping point.
    ///
    /// Backward targets are legal; a stepper without analytic rewind is
    /// expected to restore an internal checkpoint and re-step. The driver
    /// calls this repeatedly, checking for a newer target between chunks.
    fn seek_chunk(
        &mut self,
        time_s: f64,
        stride: u32,
        fidelity: Fidelity,
    ) -> Result<SeekProgress, StreamError>;

    /// Land exactly on `time_s` and produce one full-fidelity frame.
    fn refine_to(&mut self, time_s: f64) -> Result<Frame, StreamError>;

    /// Snapshot the stepper state for later rollback.
    fn checkpoint(&self) -> StepperCheckpoint;

    /// Restore a snapshot taken by `checkpoint`.
    fn restore(&mut self, checkpoint: &StepperCheckpoint) -> Result<(), StreamError>;
}
