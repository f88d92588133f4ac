//! # Capture
//!
//! Deterministic frame recording and replay.
//!
//! A capture artifact is a directory with three files:
//! - `frames.bin`: length-prefixed canonical frame encodings, in delivery
//!   order
//! - `frames.jsonl`: one human-readable metadata line per frame (step,
//!   time, hex `state_hash`, byte extent), for diagnosis without decoding
//! - `manifest.json`: session parameters, counts, and timings, finalized
//!   when the capture ends
//!
//! Replay feeds the recorded frames back through the identical decode path
//! as a [`contracts::FrameStepper`], recomputing every `state_hash` on the
//! way. The recorded stream is the ground truth: a hash mismatch or a step
//! regression is a verification failure, never a crash. `verify_artifact`
//! does the same walk without a session and reports every finding.

pub mod manifest;
pub mod replay;
pub mod verify;
pub mod writer;

pub use manifest::{CaptureArtifact, CaptureManifest, SidecarRecord};
pub use replay::ReplayStepper;
pub use verify::{verify_artifact, VerifyReport};
pub use writer::CaptureWriter;

/// File names inside an artifact directory.
pub const FRAMES_FILE: &str = "frames.bin";
pub const SIDECAR_FILE: &str = "frames.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Artifact layout version, bumped when the directory format changes.
pub const ARTIFACT_VERSION: u32 = 1;
