//! Tool settings
//!
//! Layered settings for the `confstack` tool: built-in defaults, the global
//! file, the workspace file, an explicit file and `CONFSTACK__*` environment
//! variables, in increasing precedence.

use crate::element::SaveMode;
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use config::Environment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

mod merge;
mod sources;

pub use merge::merge_policy::{DEFAULT_SAVE_MODE, DEFAULT_SECTION};
pub use sources::global_file::global_config_path;
pub use sources::workspace_file::WORKSPACE_FILE;

/// Root settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Mode used when writing a level back.
    #[serde(default)]
    pub save_mode: SaveMode,

    /// Root element name of every level document.
    #[serde(default = "default_section")]
    pub section: String,

    /// Schema manifest describing the node types.
    #[serde(default)]
    pub schema: Option<PathBuf>,

    /// Level documents, lowest first.
    #[serde(default)]
    pub levels: Vec<LevelConfig>,

    #[serde(default)]
    pub target_version: Option<String>,
}

fn default_section() -> String {
    DEFAULT_SECTION.to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            save_mode: SaveMode::default(),
            section: default_section(),
            schema: None,
            levels: Vec::new(),
            target_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Settings validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Engine(String),
    Level(String, String),
    Logging(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Engine(msg) => write!(f, "Engine: {}", msg),
            ValidationError::Level(name, msg) => write!(f, "Level '{}': {}", name, msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

impl Settings {
    /// Validate the settings, reporting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.engine.section.trim().is_empty() {
            errors.push(ValidationError::Engine(
                "Section name cannot be empty".to_string(),
            ));
        }
        if matches!(&self.engine.target_version, Some(v) if v.trim().is_empty()) {
            errors.push(ValidationError::Engine(
                "Target version cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for level in &self.engine.levels {
            if level.name.trim().is_empty() {
                errors.push(ValidationError::Engine(
                    "Level name cannot be empty".to_string(),
                ));
            } else if !seen.insert(level.name.as_str()) {
                errors.push(ValidationError::Level(
                    level.name.clone(),
                    "Duplicate level name".to_string(),
                ));
            }
            if level.path.as_os_str().is_empty() {
                errors.push(ValidationError::Level(
                    level.name.clone(),
                    "Path cannot be empty".to_string(),
                ));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "Unknown level '{}'",
                self.logging.level
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Level paths made absolute against `workspace_root`.
    pub fn level_paths(&self, workspace_root: &Path) -> Vec<(String, PathBuf)> {
        self.engine
            .levels
            .iter()
            .map(|level| (level.name.clone(), workspace_root.join(&level.path)))
            .collect()
    }
}

/// Builds [`Settings`] from every source.
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load settings for `workspace_root`.
    pub fn load(workspace_root: &Path) -> Result<Settings, ApiError> {
        Self::load_with(workspace_root, None)
    }

    /// Load settings, layering `explicit` above the workspace file.
    pub fn load_with(workspace_root: &Path, explicit: Option<&Path>) -> Result<Settings, ApiError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        if let Some(path) = explicit {
            builder = sources::workspace_file::add_explicit(builder, path)?;
        }
        builder = builder.add_source(Environment::with_prefix("CONFSTACK").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        debug!(
            workspace = %workspace_root.display(),
            level_count = settings.engine.levels.len(),
            "Settings loaded"
        );
        Self::validated(settings)
    }

    /// Load settings from a single file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<Settings, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::workspace_file::add_explicit(builder, path)?;
        let settings: Settings = builder.build()?.try_deserialize()?;
        Self::validated(settings)
    }

    fn validated(settings: Settings) -> Result<Settings, ApiError> {
        settings.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Settings validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(settings)
    }
}
