//! Lifecycle transition rules
//!
//! Pure guards checked by the driver before any work happens, kept free of
//! threading so the table is testable on its own.

use contracts::{SessionState, StreamError};

/// What a playback toggle should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Toggle {
    /// Already in the requested state; succeed without moving
    NoOp,
    /// Move to the requested state now
    Switch,
    /// A seek is in flight; the settle lands in the requested state instead
    Defer,
}

pub(crate) fn play(state: SessionState) -> Result<Toggle, StreamError> {
    match state {
        SessionState::Running => Ok(Toggle::NoOp),
        SessionState::Paused => Ok(Toggle::Switch),
        SessionState::Seeking => Ok(Toggle::Defer),
        SessionState::Idle | SessionState::Error => {
            Err(StreamError::invalid_transition("play", state))
        }
    }
}

pub(crate) fn pause(state: SessionState) -> Result<Toggle, StreamError> {
    match state {
        SessionState::Paused => Ok(Toggle::NoOp),
        SessionState::Running => Ok(Toggle::Switch),
        SessionState::Seeking => Ok(Toggle::Defer),
        SessionState::Idle | SessionState::Error => {
            Err(StreamError::invalid_transition("pause", state))
        }
    }
}

/// Single-step is only meaningful from a hold.
pub(crate) fn step(state: SessionState) -> Result<(), StreamError> {
    match state {
        SessionState::Paused => Ok(()),
        _ => Err(StreamError::invalid_transition("step", state)),
    }
}

/// Seeks are accepted while running, held, or already seeking (retarget).
pub(crate) fn seek(state: SessionState) -> Result<(), StreamError> {
    match state {
        SessionState::Running | SessionState::Paused | SessionState::Seeking => Ok(()),
        SessionState::Idle | SessionState::Error => {
            Err(StreamError::invalid_transition("seek", state))
        }
    }
}

/// Parameter updates land at a step barrier, so the stepper must be bound
/// and healthy.
pub(crate) fn update_parameters(state: SessionState) -> Result<(), StreamError> {
    match state {
        SessionState::Running | SessionState::Paused => Ok(()),
        _ => Err(StreamError::invalid_transition("update_parameters", state)),
    }
}

/// Rollback is the one way out of the error state.
pub(crate) fn rollback(state: SessionState) -> Result<(), StreamError> {
    match state {
        SessionState::Error => Ok(()),
        _ => Err(StreamError::invalid_transition("rollback", state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_toggles_follow_the_table() {
        assert_eq!(play(SessionState::Running).unwrap(), Toggle::NoOp);
        assert_eq!(play(SessionState::Paused).unwrap(), Toggle::Switch);
        assert_eq!(pause(SessionState::Running).unwrap(), Toggle::Switch);
        assert_eq!(pause(SessionState::Paused).unwrap(), Toggle::NoOp);
        assert!(play(SessionState::Idle).is_err());
        assert!(pause(SessionState::Idle).is_err());
    }

    #[test]
    fn seeking_defers_playback_toggles() {
        assert_eq!(play(SessionState::Seeking).unwrap(), Toggle::Defer);
        assert_eq!(pause(SessionState::Seeking).unwrap(), Toggle::Defer);
    }

    #[test]
    fn step_requires_a_hold() {
        assert!(step(SessionState::Paused).is_ok());
        let err = step(SessionState::Running).unwrap_err();
        assert_eq!(err.to_string(), "'step' is not valid in state 'running'");
        assert!(step(SessionState::Seeking).is_err());
    }

    #[test]
    fn error_state_only_allows_rollback() {
        assert!(rollback(SessionState::Error).is_ok());
        assert!(play(SessionState::Error).is_err());
        assert!(pause(SessionState::Error).is_err());
        assert!(seek(SessionState::Error).is_err());
        assert!(step(SessionState::Error).is_err());
        assert!(update_parameters(SessionState::Error).is_err());
        assert!(rollback(SessionState::Running).is_err());
    }

    #[test]
    fn seek_retargets_while_seeking() {
        assert!(seek(SessionState::Seeking).is_ok());
        assert!(seek(SessionState::Running).is_ok());
        assert!(seek(SessionState::Paused).is_ok());
        assert!(seek(SessionState::Idle).is_err());
    }
}
