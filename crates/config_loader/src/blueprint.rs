//! StreamBlueprint - the on-disk description of one streaming run
//!
//! Mirrors the TOML layout: `[session]`, `[scrub]`, `[solver]`, `[capture]`,
//! `[observability]`, plus an array of `[[subscriptions]]`. Every section is
//! optional; an empty file is a valid blueprint that runs on library
//! defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use contracts::{
    DropPolicy, FieldsMask, ScrubConfig, SessionConfig, StreamError, SubscriptionSpec,
};
use observability::{LogFormat, ObservabilityConfig};
use synthetic_solver::SyntheticConfig;

/// Top-level blueprint for one streaming run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBlueprint {
    /// Session tuning
    #[serde(default)]
    pub session: SessionSection,

    /// Scrub controller tuning
    #[serde(default)]
    pub scrub: ScrubConfig,

    /// Synthetic solver setup
    #[serde(default)]
    pub solver: SyntheticConfig,

    /// Capture recording setup
    #[serde(default)]
    pub capture: CaptureSection,

    /// Logging and metrics setup
    #[serde(default)]
    pub observability: ObservabilitySection,

    /// Consumers to register at startup
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSection>,
}

impl StreamBlueprint {
    /// Session configuration with `[session]` and `[scrub]` folded over
    /// library defaults.
    pub fn session_config(&self) -> SessionConfig {
        let base = SessionConfig::default();
        SessionConfig {
            queue_depth: self.session.queue_depth.unwrap_or(base.queue_depth),
            drop_policy: self.session.drop_policy.unwrap_or(base.drop_policy),
            checkpoint_interval: self
                .session
                .checkpoint_interval
                .unwrap_or(base.checkpoint_interval),
            latency_window: self.session.latency_window.unwrap_or(base.latency_window),
            target_step_rate_hz: self.session.target_step_rate_hz,
            scrub: self.scrub,
        }
    }

    /// Subscription specs ready for registration, in file order.
    pub fn subscription_specs(&self) -> Result<Vec<SubscriptionSpec>, StreamError> {
        self.subscriptions
            .iter()
            .map(SubscriptionSection::to_spec)
            .collect()
    }

    /// Logging/metrics configuration for `observability::init_with_config`.
    pub fn observability_config(&self) -> Result<ObservabilityConfig, StreamError> {
        Ok(ObservabilityConfig {
            log_format: self.observability.parse_log_format()?,
            metrics_port: self.observability.metrics_port,
            default_log_level: self.observability.log_level.clone(),
        })
    }
}

/// `[session]` overrides; absent fields fall back to library defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSection {
    /// Production queue depth
    pub queue_depth: Option<usize>,

    /// Production queue behavior when full
    pub drop_policy: Option<DropPolicy>,

    /// Steps between checkpoints
    pub checkpoint_interval: Option<u64>,

    /// Rolling latency window length per subscription
    pub latency_window: Option<usize>,

    /// Producer pacing in steps per second; absent means free-run
    pub target_step_rate_hz: Option<f64>,
}

/// `[capture]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureSection {
    /// Directory capture takes are written under
    pub directory: Option<PathBuf>,

    /// Begin recording as soon as the run starts
    #[serde(default)]
    pub auto_start: bool,
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[observability]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySection {
    /// One of `json`, `pretty`, `compact`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Prometheus exporter port; absent disables the exporter
    pub metrics_port: Option<u16>,

    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            metrics_port: None,
            log_level: default_log_level(),
        }
    }
}

impl ObservabilitySection {
    pub(crate) fn parse_log_format(&self) -> Result<LogFormat, StreamError> {
        match self.log_format.as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(StreamError::configuration(
                "observability.log_format",
                format!("unknown log format '{other}', expected json, pretty, or compact"),
            )),
        }
    }
}

/// One `[[subscriptions]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSection {
    /// Subscriber name
    pub label: String,

    /// Optional field names: `rotations`, `strains`, `stresses`,
    /// `aggregates`, or `all`
    #[serde(default)]
    pub fields: Vec<String>,

    /// Deliver contact geometry
    #[serde(default)]
    pub include_contact: bool,

    /// Deliver probe samples
    #[serde(default)]
    pub include_probes: bool,

    /// Private queue depth
    pub queue_depth: Option<usize>,

    /// Behavior when the private queue is full
    #[serde(default)]
    pub drop_policy: DropPolicy,
}

impl SubscriptionSection {
    /// Resolve the section into a registration request.
    pub fn to_spec(&self) -> Result<SubscriptionSpec, StreamError> {
        let mut spec = SubscriptionSpec::new(self.label.clone())
            .with_fields(self.fields_mask()?)
            .with_drop_policy(self.drop_policy);
        if self.include_contact {
            spec = spec.with_contact();
        }
        if self.include_probes {
            spec = spec.with_probes();
        }
        if let Some(depth) = self.queue_depth {
            spec = spec.with_queue_depth(depth);
        }
        Ok(spec)
    }

    pub(crate) fn fields_mask(&self) -> Result<FieldsMask, StreamError> {
        let mut mask = FieldsMask::none();
        for name in &self.fields {
            mask = mask
                | match name.as_str() {
                    "rotations" => FieldsMask::ROTATIONS,
                    "strains" => FieldsMask::STRAINS,
                    "stresses" => FieldsMask::STRESSES,
                    "aggregates" => FieldsMask::AGGREGATES,
                    "all" => FieldsMask::all(),
                    other => {
                        return Err(StreamError::configuration(
                            format!("subscriptions[{}].fields", self.label),
                            format!(
                                "unknown field '{other}', expected rotations, strains, \
                                 stresses, aggregates, or all"
                            ),
                        ));
                    }
                };
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blueprint_resolves_to_defaults() {
        let blueprint = StreamBlueprint::default();
        let config = blueprint.session_config();
        assert_eq!(config, SessionConfig::default());
        assert!(blueprint.subscription_specs().unwrap().is_empty());
    }

    #[test]
    fn session_overrides_fold_over_defaults() {
        let blueprint = StreamBlueprint {
            session: SessionSection {
                queue_depth: Some(4),
                target_step_rate_hz: Some(120.0),
                ..SessionSection::default()
            },
            ..StreamBlueprint::default()
        };
        let config = blueprint.session_config();
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.target_step_rate_hz, Some(120.0));
        assert_eq!(config.checkpoint_interval, SessionConfig::default().checkpoint_interval);
    }

    #[test]
    fn field_names_resolve_to_mask_bits() {
        let section = SubscriptionSection {
            label: "renderer".into(),
            fields: vec!["stresses".into(), "aggregates".into()],
            include_contact: true,
            include_probes: false,
            queue_depth: Some(16),
            drop_policy: DropPolicy::DropOldest,
        };
        let spec = section.to_spec().unwrap();
        assert!(spec.fields.contains(FieldsMask::STRESSES));
        assert!(spec.fields.contains(FieldsMask::AGGREGATES));
        assert!(!spec.fields.contains(FieldsMask::ROTATIONS));
        assert!(spec.include_contact);
        assert_eq!(spec.queue_depth, 16);
    }

    #[test]
    fn unknown_field_name_rejected() {
        let section = SubscriptionSection {
            label: "renderer".into(),
            fields: vec!["velocity".into()],
            include_contact: false,
            include_probes: false,
            queue_depth: None,
            drop_policy: DropPolicy::DropOldest,
        };
        let err = section.to_spec().unwrap_err();
        assert!(err.to_string().contains("unknown field"), "got: {err}");
    }

    #[test]
    fn unknown_log_format_rejected() {
        let section = ObservabilitySection {
            log_format: "xml".into(),
            ..ObservabilitySection::default()
        };
        let err = section.parse_log_format().unwrap_err();
        assert!(err.to_string().contains("unknown log format"), "got: {err}");
    }
}
