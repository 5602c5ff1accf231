//! Error types for the configuration engine and the tool layer around it.

use crate::value::SourceInfo;
use thiserror::Error;

/// Coarse classification of an [`EngineError`], convenient for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaViolation,
    LockViolation,
    DuplicateKey,
    RequiredMissing,
    ValidationFailure,
    ReadOnlyViolation,
    Document,
    Aggregate,
}

/// Errors raised by the merge/diff/lock engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Schema violation: {message}{}", at(.location))]
    SchemaViolation {
        message: String,
        location: Option<SourceInfo>,
    },

    #[error("Lock violation: {message}{}", at(.location))]
    LockViolation {
        message: String,
        location: Option<SourceInfo>,
    },

    #[error("Duplicate key: {message}{}", at(.location))]
    DuplicateKey {
        message: String,
        location: Option<SourceInfo>,
    },

    #[error("Required attribute '{name}' not found{}", at(.location))]
    RequiredMissing {
        name: String,
        location: Option<SourceInfo>,
    },

    #[error("Invalid value for '{property}': {message}{}", at(.location))]
    ValidationFailure {
        property: String,
        message: String,
        location: Option<SourceInfo>,
    },

    #[error("The configuration is read only")]
    ReadOnlyViolation,

    #[error("Document error: {message}{}", at(.location))]
    Document {
        message: String,
        location: Option<SourceInfo>,
    },

    #[error("{} configuration error(s):\n{}", .0.len(), join_errors(.0))]
    Aggregate(Vec<EngineError>),
}

fn at(location: &Option<SourceInfo>) -> String {
    match location {
        Some(info) => format!(" ({})", info),
        None => String::new(),
    }
}

fn join_errors(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl EngineError {
    pub fn schema(message: impl Into<String>) -> Self {
        EngineError::SchemaViolation {
            message: message.into(),
            location: None,
        }
    }

    pub fn locked(message: impl Into<String>) -> Self {
        EngineError::LockViolation {
            message: message.into(),
            location: None,
        }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        EngineError::DuplicateKey {
            message: message.into(),
            location: None,
        }
    }

    pub fn required(name: impl Into<String>) -> Self {
        EngineError::RequiredMissing {
            name: name.into(),
            location: None,
        }
    }

    pub fn invalid(property: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::ValidationFailure {
            property: property.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn document(message: impl Into<String>) -> Self {
        EngineError::Document {
            message: message.into(),
            location: None,
        }
    }

    /// Lock violation for an attribute locked at a higher level.
    pub fn attribute_locked(name: &str) -> Self {
        Self::locked(format!(
            "The attribute '{}' has been locked in a higher level configuration",
            name
        ))
    }

    /// Lock violation for an element locked at a higher level.
    pub fn element_locked(name: &str) -> Self {
        Self::locked(format!(
            "The element '{}' has been locked in a higher level configuration",
            name
        ))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            EngineError::LockViolation { .. } => ErrorKind::LockViolation,
            EngineError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            EngineError::RequiredMissing { .. } => ErrorKind::RequiredMissing,
            EngineError::ValidationFailure { .. } => ErrorKind::ValidationFailure,
            EngineError::ReadOnlyViolation => ErrorKind::ReadOnlyViolation,
            EngineError::Document { .. } => ErrorKind::Document,
            EngineError::Aggregate(_) => ErrorKind::Aggregate,
        }
    }

    pub fn location(&self) -> Option<&SourceInfo> {
        match self {
            EngineError::SchemaViolation { location, .. }
            | EngineError::LockViolation { location, .. }
            | EngineError::DuplicateKey { location, .. }
            | EngineError::RequiredMissing { location, .. }
            | EngineError::ValidationFailure { location, .. }
            | EngineError::Document { location, .. } => location.as_ref(),
            EngineError::ReadOnlyViolation | EngineError::Aggregate(_) => None,
        }
    }

    /// Attach `info` unless the error already names a location.
    pub fn with_location(mut self, info: &SourceInfo) -> Self {
        match &mut self {
            EngineError::SchemaViolation { location, .. }
            | EngineError::LockViolation { location, .. }
            | EngineError::DuplicateKey { location, .. }
            | EngineError::RequiredMissing { location, .. }
            | EngineError::ValidationFailure { location, .. }
            | EngineError::Document { location, .. } => {
                if location.is_none() {
                    *location = Some(info.clone());
                }
            }
            EngineError::ReadOnlyViolation | EngineError::Aggregate(_) => {}
        }
        self
    }

    /// Flatten nested aggregates into a single list.
    pub fn into_errors(self) -> Vec<EngineError> {
        match self {
            EngineError::Aggregate(errors) => {
                errors.into_iter().flat_map(EngineError::into_errors).collect()
            }
            other => vec![other],
        }
    }

    /// Collapse a list of errors: `Ok` when empty, the error itself when
    /// there is one, an aggregate otherwise.
    pub fn from_errors(mut errors: Vec<EngineError>) -> Result<(), EngineError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(EngineError::Aggregate(errors)),
        }
    }
}

/// Errors surfaced by the tool layer (settings, manifest, CLI)
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Manifest error: {0}")]
    ManifestError(String),

    #[error("Invalid edit '{0}': expected [path/]name@attribute=value")]
    InvalidEdit(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
