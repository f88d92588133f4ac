//! Blueprint validation
//!
//! Rules:
//! - session, scrub, and solver tuning within the ranges the runtime accepts
//! - subscription labels unique, every spec registrable
//! - capture auto_start requires a directory
//! - observability format and level strings resolvable

use std::collections::HashSet;

use contracts::StreamError;

use crate::blueprint::StreamBlueprint;

/// Validate a parsed blueprint. Returns the first error found.
pub fn validate(blueprint: &StreamBlueprint) -> Result<(), StreamError> {
    blueprint.session_config().validate()?;
    blueprint.solver.validate()?;
    validate_subscriptions(blueprint)?;
    validate_capture(blueprint)?;
    blueprint.observability.parse_log_format()?;
    validate_log_level(blueprint)?;
    Ok(())
}

fn validate_subscriptions(blueprint: &StreamBlueprint) -> Result<(), StreamError> {
    let mut seen = HashSet::new();
    for section in &blueprint.subscriptions {
        if !seen.insert(section.label.as_str()) {
            return Err(StreamError::configuration(
                format!("subscriptions[{}]", section.label),
                "duplicate subscription label",
            ));
        }
        section.to_spec()?.validate()?;
    }
    Ok(())
}

fn validate_capture(blueprint: &StreamBlueprint) -> Result<(), StreamError> {
    let capture = &blueprint.capture;
    if let Some(directory) = &capture.directory {
        if directory.as_os_str().is_empty() {
            return Err(StreamError::configuration(
                "capture.directory",
                "capture directory cannot be empty",
            ));
        }
    }
    if capture.auto_start && capture.directory.is_none() {
        return Err(StreamError::configuration(
            "capture.auto_start",
            "auto_start requires capture.directory to be set",
        ));
    }
    Ok(())
}

fn validate_log_level(blueprint: &StreamBlueprint) -> Result<(), StreamError> {
    if blueprint.observability.log_level.trim().is_empty() {
        return Err(StreamError::configuration(
            "observability.log_level",
            "log level cannot be empty",
        ));
    }
    Ok(())
}
