//! # Synthetic Solver
//!
//! Analytic stand-in for a real finite-element solver.
//!
//! Responsibilities:
//! - Modified-sine cam lift profile with validated parameters
//! - Cantilever strip mesh whose tip follows the lift curve
//! - [`FrameStepper`] implementation with checkpoint/restore, chunked
//!   seeking, and optional divergence injection for error-path tests
//!
//! Every produced quantity is a closed-form function of (time, parameters),
//! so runs are reproducible and replay comparisons are exact.

pub mod mesh;
pub mod profile;
pub mod stepper;

pub use contracts::{Fidelity, FrameStepper, StepOutcome};
pub use mesh::{MeshConfig, StripMesh};
pub use profile::{MotionProfile, ProfileParameters};
pub use stepper::{SyntheticConfig, SyntheticStepper, CAM_SURFACE_ID};
