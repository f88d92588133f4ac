//! # Config Loader
//!
//! Loads, parses, and validates the blueprint describing one streaming run.
//!
//! Responsibilities:
//! - Parse TOML (primary) or JSON blueprints
//! - Validate every section against the ranges the runtime accepts
//! - Resolve sections into the typed configs the runtime consumes
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("run.toml")).unwrap();
//! let config = blueprint.session_config();
//! ```

mod blueprint;
mod parser;
mod validator;

pub use blueprint::{
    CaptureSection, ObservabilitySection, SessionSection, StreamBlueprint, SubscriptionSection,
};
pub use parser::ConfigFormat;

use std::path::Path;

use contracts::StreamError;

/// Blueprint loader
///
/// Static methods to load a blueprint from a file or string.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a blueprint from a file path.
    ///
    /// The format comes from the file extension (.toml / .json).
    pub fn load_from_path(path: &Path) -> Result<StreamBlueprint, StreamError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load a blueprint from a string, validating it.
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<StreamBlueprint, StreamError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Serialize a blueprint to TOML.
    pub fn to_toml(blueprint: &StreamBlueprint) -> Result<String, StreamError> {
        toml::to_string_pretty(blueprint).map_err(|e| {
            StreamError::configuration("blueprint", format!("TOML serialize error: {e}"))
        })
    }

    /// Serialize a blueprint to JSON.
    pub fn to_json(blueprint: &StreamBlueprint) -> Result<String, StreamError> {
        serde_json::to_string_pretty(blueprint).map_err(|e| {
            StreamError::configuration("blueprint", format!("JSON serialize error: {e}"))
        })
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, StreamError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            StreamError::configuration("blueprint", "cannot determine file format from extension")
        })?;
        ConfigFormat::from_extension(ext).ok_or_else(|| {
            StreamError::configuration("blueprint", format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, StreamError> {
        Ok(std::fs::read_to_string(path)?)
    }
}
