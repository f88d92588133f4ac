//! Blueprint parsing
//!
//! TOML is the primary format; JSON is accepted for machine-generated
//! blueprints.

use contracts::StreamError;

use crate::blueprint::StreamBlueprint;

/// Blueprint file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<StreamBlueprint, StreamError> {
    toml::from_str(content)
        .map_err(|e| StreamError::configuration("blueprint", format!("TOML parse error: {e}")))
}

pub fn parse_json(content: &str) -> Result<StreamBlueprint, StreamError> {
    serde_json::from_str(content)
        .map_err(|e| StreamError::configuration("blueprint", format!("JSON parse error: {e}")))
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<StreamBlueprint, StreamError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_minimal() {
        let content = r#"
[session]
queue_depth = 4
target_step_rate_hz = 120.0

[[subscriptions]]
label = "renderer"
fields = ["stresses"]
"#;
        let blueprint = parse_toml(content).unwrap();
        assert_eq!(blueprint.session.queue_depth, Some(4));
        assert_eq!(blueprint.subscriptions.len(), 1);
        assert_eq!(blueprint.subscriptions[0].label, "renderer");
    }

    #[test]
    fn parse_json_minimal() {
        let content = r#"{
            "session": { "queue_depth": 4 },
            "subscriptions": [
                { "label": "renderer", "fields": ["stresses"], "queue_depth": 8 }
            ]
        }"#;
        let blueprint = parse_json(content).unwrap();
        assert_eq!(blueprint.session.queue_depth, Some(4));
        assert_eq!(blueprint.subscriptions[0].queue_depth, Some(8));
    }

    #[test]
    fn toml_syntax_error_reported() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("TOML parse error"), "got: {err}");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
