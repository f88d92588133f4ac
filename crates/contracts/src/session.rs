//! Session lifecycle contracts: states, quality hints, config, events
//!
//! The state machine itself lives in the session crate; these are the
//! shared vocabulary types every crate speaks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DropPolicy, StreamError};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No stepper bound
    Idle,
    /// Stepper advancing continuously
    Running,
    /// Stepper bound but held
    Paused,
    /// Servicing a seek request
    Seeking,
    /// Solver divergence or stepper fault; see `last_error`
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Seeking => "seeking",
            SessionState::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Fidelity/latency trade-off for interactive seeking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityHint {
    /// User is actively dragging: skip-step at a stride, preview fidelity,
    /// clamped queue depth, latest target wins
    Coarse,
    /// User settled: one exact full-fidelity step to the requested time
    Refine,
}

fn default_queue_depth() -> usize {
    8
}

fn default_checkpoint_interval() -> u64 {
    32
}

fn default_latency_window() -> usize {
    256
}

fn default_coarse_stride() -> u32 {
    8
}

fn default_coarse_depth() -> usize {
    3
}

/// Scrub controller tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrubConfig {
    /// Solver steps advanced per published preview frame while coarse
    #[serde(default = "default_coarse_stride")]
    pub coarse_stride: u32,

    /// Queue depth ceiling applied to subscriptions while coarse
    #[serde(default = "default_coarse_depth")]
    pub coarse_depth: usize,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            coarse_stride: default_coarse_stride(),
            coarse_depth: default_coarse_depth(),
        }
    }
}

impl ScrubConfig {
    /// Reject unusable scrub tuning.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.coarse_stride == 0 {
            return Err(StreamError::configuration(
                "scrub.coarse_stride",
                "coarse stride must be at least 1, got 0",
            ));
        }
        if self.coarse_depth == 0 || self.coarse_depth > 3 {
            return Err(StreamError::configuration(
                "scrub.coarse_depth",
                format!(
                    "coarse queue depth must be between 1 and 3, got {}",
                    self.coarse_depth
                ),
            ));
        }
        Ok(())
    }
}

/// Session configuration passed to `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Production queue depth between the driver and the dispatcher
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Production queue behavior when full
    #[serde(default)]
    pub drop_policy: DropPolicy,

    /// Steps between stepper checkpoints (keyframe cadence)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Rolling latency window length, in samples, per subscription
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,

    /// Optional producer pacing (steps per second); unpaced when absent
    #[serde(default)]
    pub target_step_rate_hz: Option<f64>,

    /// Scrub controller tuning
    #[serde(default)]
    pub scrub: ScrubConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            drop_policy: DropPolicy::default(),
            checkpoint_interval: default_checkpoint_interval(),
            latency_window: default_latency_window(),
            target_step_rate_hz: None,
            scrub: ScrubConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Reject unusable session configuration before the driver spawns.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.queue_depth == 0 {
            return Err(StreamError::configuration(
                "session.queue_depth",
                "queue depth must be at least 1, got 0",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(StreamError::configuration(
                "session.checkpoint_interval",
                "checkpoint interval must be at least 1, got 0",
            ));
        }
        if self.latency_window == 0 {
            return Err(StreamError::configuration(
                "session.latency_window",
                "latency window must hold at least 1 sample, got 0",
            ));
        }
        if let Some(rate) = self.target_step_rate_hz {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(StreamError::configuration(
                    "session.target_step_rate_hz",
                    format!("step rate must be a positive finite number, got {rate}"),
                ));
            }
        }
        self.scrub.validate()
    }
}

/// Advisory session event
///
/// Closed set: every delivery site is exhaustively checked at compile time,
/// so adding a kind forces every consumer to decide how to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Lifecycle transition
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// A parameter update was applied at a step barrier
    ParametersApplied { step_index: u64 },

    /// A refine seek completed and published its frame
    SeekSettled { time_s: f64, step_index: u64 },

    /// The stepper reported divergence
    Diverged { step_index: u64, message: String },

    /// A rollback restored the stepper to a checkpoint
    RolledBack { to_step: u64 },

    /// A capture recorder was attached
    CaptureStarted { path: String },

    /// A capture artifact was finalized
    CaptureFinished { path: String, frame_count: u64 },

    /// A subscriber registered
    SubscriberAdded { label: String },

    /// A subscriber was removed
    SubscriberRemoved { label: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_depth_rejected() {
        let config = SessionConfig {
            queue_depth: 0,
            ..SessionConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue depth"), "got: {err}");
    }

    #[test]
    fn coarse_depth_ceiling_enforced() {
        let config = SessionConfig {
            scrub: ScrubConfig {
                coarse_stride: 8,
                coarse_depth: 5,
            },
            ..SessionConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("between 1 and 3"), "got: {err}");
    }

    #[test]
    fn negative_step_rate_rejected() {
        let config = SessionConfig {
            target_step_rate_hz: Some(-60.0),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn event_serializes_tagged() {
        let event = SessionEvent::StateChanged {
            from: SessionState::Idle,
            to: SessionState::Running,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"state_changed\""), "got: {json}");
    }
}
