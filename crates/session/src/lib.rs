//! # Session
//!
//! Control plane over one solver run.
//!
//! Responsibilities:
//! - Lifecycle state machine, driven on a dedicated solver thread
//! - Frame production into the bounded production queue, paced or free-run
//! - Scrub seeking: coarse previews while the gesture moves, an exact
//!   full-fidelity settle when it stops
//! - Checkpoint rollback out of solver divergence
//! - Capture recording and lossless replay of recorded artifacts
//!
//! The [`Session`] type is the entry point. Bind a [`FrameStepper`] with
//! [`Session::start`], subscribe consumers with [`Session::subscribe_frames`],
//! and control playback with the async command methods.

mod driver;
mod scrub;
mod session;
mod transitions;

pub use crate::session::{CaptureHandle, Session};

pub use capture::CaptureArtifact;
pub use contracts::{
    DiagnosticsSnapshot, DropPolicy, ErrorInfo, FieldsMask, Fidelity, Frame, FrameStepper,
    ParameterSet, QualityHint, ScrubConfig, SessionConfig, SessionEvent, SessionState,
    StreamError, SubscriptionSpec,
};
pub use dispatcher::{drive_sink, FrameStreamHandle, LogSink};
