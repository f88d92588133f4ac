//! ParameterSet - named solver parameters
//!
//! Ordered map so serialization and hashing are deterministic across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::StreamError;

/// Named solver parameters, applied atomically at a step barrier.
///
/// Backed by a `BTreeMap` so iteration order (and therefore any encoding
/// the parameters feed into) is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, f64>);

impl ParameterSet {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one parameter, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Look up one parameter.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Look up one parameter with a fallback.
    pub fn get_or(&self, name: &str, fallback: f64) -> f64 {
        self.get(name).unwrap_or(fallback)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Overlay `other` onto this set, replacing colliding names.
    pub fn merge(&mut self, other: &ParameterSet) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), *value);
        }
    }

    /// Reject parameter sets a solver could not safely consume.
    pub fn validate(&self) -> Result<(), StreamError> {
        for (name, value) in &self.0 {
            if name.is_empty() {
                return Err(StreamError::configuration(
                    "parameters",
                    "parameter name cannot be empty",
                ));
            }
            if !value.is_finite() {
                return Err(StreamError::configuration(
                    format!("parameters.{name}"),
                    format!("parameter '{name}' must be finite, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, f64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_is_name_ordered() {
        let mut params = ParameterSet::new();
        params.set("rpm", 3000.0).set("base_radius", 25.0).set("max_lift", 10.0);
        let names: Vec<_> = params.iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, vec!["base_radius", "max_lift", "rpm"]);
    }

    #[test]
    fn non_finite_value_rejected() {
        let mut params = ParameterSet::new();
        params.set("max_lift", f64::NAN);
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("max_lift"), "got: {err}");
    }

    #[test]
    fn merge_overlays_values() {
        let mut base = ParameterSet::new();
        base.set("rpm", 3000.0).set("max_lift", 10.0);
        let mut update = ParameterSet::new();
        update.set("rpm", 1500.0);
        base.merge(&update);
        assert_eq!(base.get("rpm"), Some(1500.0));
        assert_eq!(base.get("max_lift"), Some(10.0));
    }
}
