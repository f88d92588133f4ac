//! Layered error definitions
//!
//! Categorized by source: configuration / control / solver / schema /
//! replay. Queue overflow is deliberately absent: a full queue is policy,
//! not an error, and is only visible through drop counters.

use thiserror::Error;

use crate::SessionState;

/// Unified error type
#[derive(Debug, Error)]
pub enum StreamError {
    // ===== Configuration Errors =====
    /// Invalid configuration, rejected synchronously with state unchanged
    #[error("configuration error at '{field}': {message}")]
    Configuration { field: String, message: String },

    // ===== Control Errors =====
    /// Operation not legal in the current lifecycle state
    #[error("'{operation}' is not valid in state '{state}'")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// The driver has shut down; the command was not processed
    #[error("session is closed")]
    SessionClosed,

    // ===== Solver Errors =====
    /// The stepper reported numerical divergence
    #[error("solver diverged at step {step_index}: {message}")]
    SolverDivergence { step_index: u64, message: String },

    /// Non-numeric stepper failure (bad checkpoint, unusable state)
    #[error("stepper fault: {message}")]
    StepperFault { message: String },

    // ===== Schema Errors =====
    /// Encoder/decoder version skew; fatal for this frame only
    #[error("frame schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u16, found: u16 },

    /// Structurally invalid frame bytes (bad magic, truncated section,
    /// misaligned view)
    #[error("corrupt frame: {message}")]
    FrameCorrupt { message: String },

    // ===== Replay Errors =====
    /// Recomputed hash differs from the recorded one
    #[error("replay hash mismatch at step {step_index}")]
    ReplayHashMismatch { step_index: u64 },

    /// Replay stream delivered steps out of order
    #[error("replay step order violation: {prev} followed by {next}")]
    ReplayOutOfOrder { prev: u64, next: u64 },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Create configuration error
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid transition error
    pub fn invalid_transition(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidTransition { operation, state }
    }

    /// Create solver divergence error
    pub fn divergence(step_index: u64, message: impl Into<String>) -> Self {
        Self::SolverDivergence {
            step_index,
            message: message.into(),
        }
    }

    /// Create stepper fault error
    pub fn stepper_fault(message: impl Into<String>) -> Self {
        Self::StepperFault {
            message: message.into(),
        }
    }

    /// Create corrupt frame error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::FrameCorrupt {
            message: message.into(),
        }
    }

    /// True for errors the configuration taxonomy rejects synchronously.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Compact error description carried in `last_error` and diagnostics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorInfo {
    /// Step the error was observed at
    pub step_index: u64,

    /// Human-readable description
    pub message: String,
}

impl ErrorInfo {
    /// Capture an error at a step.
    pub fn at_step(step_index: u64, error: &StreamError) -> Self {
        Self {
            step_index,
            message: error.to_string(),
        }
    }
}
