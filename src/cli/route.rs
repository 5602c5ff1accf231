//! CLI route: single route table and run context.

use crate::cli::output::{format_errors, format_schema};
use crate::cli::parse::{Commands, EditSpec, PathSegment};
use crate::config::{Settings, SettingsLoader};
use crate::element::{Element, SaveMode};
use crate::error::{ApiError, EngineError};
use crate::host::{HostContext, TargetVersion};
use crate::manifest::Manifest;
use crate::schema::ElementKey;
use crate::section::{LevelSource, Section};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context for CLI execution: settings, compiled manifest and the
/// section facade for the configured level stack.
pub struct RunContext {
    workspace_root: PathBuf,
    settings: Settings,
    manifest: Manifest,
    section: Section,
}

impl RunContext {
    /// Load settings and the schema manifest for `workspace_root`.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let settings = SettingsLoader::load_with(&workspace_root, config_path.as_deref())?;
        let schema_path = settings.engine.schema.as_ref().ok_or_else(|| {
            ApiError::ConfigError("engine.schema is not set".to_string())
        })?;
        let manifest = Manifest::load(&workspace_root.join(schema_path))?;
        let mut section = Section::new(
            settings.engine.section.clone(),
            Arc::clone(manifest.root()?),
        );
        if let Some(version) = &settings.engine.target_version {
            section = section.with_context(HostContext::new(TargetVersion(version.clone())));
        }
        Ok(Self {
            workspace_root,
            settings,
            manifest,
            section,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Resolve { level } => self.handle_resolve(level.as_deref()),
            Commands::Check => self.handle_check(),
            Commands::Set { edits, mode, write } => {
                self.handle_set(edits, mode.unwrap_or(self.settings.engine.save_mode), *write)
            }
            Commands::Schema => Ok(format_schema(&self.manifest)),
        }
    }

    fn level_sources(&self) -> Result<Vec<LevelSource>, ApiError> {
        let paths = self.settings.level_paths(&self.workspace_root);
        if paths.is_empty() {
            return Err(ApiError::ConfigError("No levels configured".to_string()));
        }
        paths
            .into_iter()
            .map(|(_, path)| read_level(&path))
            .collect()
    }

    fn handle_resolve(&self, level: Option<&str>) -> Result<String, ApiError> {
        let sources = self.level_sources()?;
        let index = match level {
            None => sources.len() - 1,
            Some(name) => self
                .settings
                .engine
                .levels
                .iter()
                .position(|l| l.name == name)
                .ok_or_else(|| ApiError::ConfigError(format!("Unknown level '{}'", name)))?,
        };
        let resolved = self.section.resolve(&sources[..=index])?;
        let effective = resolved
            .last()
            .ok_or_else(|| ApiError::ConfigError("No levels configured".to_string()))?;
        info!(level = index, "Resolved effective configuration");
        Ok(self
            .section
            .save(effective, None, SaveMode::Full)?
            .unwrap_or_else(|| empty_document(self.section.name())))
    }

    fn handle_check(&self) -> Result<String, ApiError> {
        let sources = self.level_sources()?;
        let problems = self.section.check(&sources);
        if problems.is_empty() {
            return Ok(format!("OK: {} level(s) checked", sources.len()));
        }
        info!(problem_count = problems.len(), "Check found problems");
        Err(ApiError::Engine(EngineError::Aggregate(problems)))
    }

    fn handle_set(&self, edits: &[EditSpec], mode: SaveMode, write: bool) -> Result<String, ApiError> {
        let sources = self.level_sources()?;
        let mut resolved = self.section.resolve(&sources)?;
        let mut top = resolved
            .pop()
            .ok_or_else(|| ApiError::ConfigError("No levels configured".to_string()))?;
        for edit in edits {
            apply_edit(&mut top, edit)?;
        }
        let text = self.section.save(&top, resolved.last(), mode)?;
        debug!(mode = %mode, changed = text.is_some(), "Computed level delta");

        if write {
            let path = self
                .settings
                .level_paths(&self.workspace_root)
                .pop()
                .map(|(_, path)| path)
                .ok_or_else(|| ApiError::ConfigError("No levels configured".to_string()))?;
            let body = text
                .clone()
                .unwrap_or_else(|| empty_document(self.section.name()));
            write_level(&path, &body)?;
            info!(path = %path.display(), "Level written");
        }
        Ok(text.unwrap_or_else(|| "(no changes)".to_string()))
    }
}

fn read_level(path: &Path) -> Result<LevelSource, ApiError> {
    let file = path.display().to_string();
    if !path.exists() {
        return Ok(LevelSource::missing(file));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LevelSource::new(file, text))
}

fn write_level(path: &Path, text: &str) -> Result<(), ApiError> {
    let io_error = |source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, format!("{}\n", text.trim_end())).map_err(io_error)
}

fn empty_document(name: &str) -> String {
    format!("<{}/>", name)
}

/// Apply one `[path/]name@attribute=value` edit below `root`.
pub(crate) fn apply_edit(root: &mut Element, edit: &EditSpec) -> Result<(), ApiError> {
    let mut target = root;
    for segment in &edit.path {
        target = step(target, segment)?;
    }
    let prop = target
        .schema()
        .property(&edit.attribute)
        .filter(|p| !p.is_element())
        .ok_or_else(|| {
            EngineError::schema(format!(
                "Unrecognized attribute '{}' on '{}'",
                edit.attribute,
                target.tag_name()
            ))
        })?;
    let value = prop.parse(&edit.value)?;
    target.set(&edit.attribute, Some(value))?;
    Ok(())
}

fn step<'a>(target: &'a mut Element, segment: &PathSegment) -> Result<&'a mut Element, ApiError> {
    let Some(key_text) = &segment.key else {
        let tag = target.tag_name().to_string();
        return target.child_mut(&segment.name).ok_or_else(|| {
            EngineError::schema(format!("'{}' has no element '{}'", tag, segment.name)).into()
        });
    };

    let tag = target.tag_name().to_string();
    let collection = if target.is_collection() {
        target
    } else {
        target
            .default_collection_mut()
            .ok_or_else(|| EngineError::schema(format!("'{}' is not a collection", tag)))?
    };
    let item_tag = collection
        .collection()
        .map(|c| c.item_tag().to_string())
        .unwrap_or_default();
    if item_tag != segment.name {
        return Err(EngineError::schema(format!(
            "Members of '{}' are written as '{}', not '{}'",
            tag, item_tag, segment.name
        ))
        .into());
    }

    let item_schema = collection
        .schema()
        .collection()
        .map(|c| Arc::clone(c.item()))
        .ok_or_else(|| EngineError::schema(format!("'{}' is not a collection", tag)))?;
    let key_prop = item_schema
        .key_properties()
        .next()
        .ok_or_else(|| EngineError::schema(format!("'{}' members have no key", tag)))?;
    let key_value = key_prop.parse(key_text)?;
    let key = ElementKey::single(key_value.clone());

    if collection.item(&key).is_none() {
        let mut item = collection.create_item()?;
        item.set(key_prop.name(), Some(key_value))?;
        collection.add_item(item)?;
    }
    collection.item_mut(&key).ok_or_else(|| {
        EngineError::schema(format!("The entry '{}' could not be added to '{}'", key, tag)).into()
    })
}
