//! CLI output: error mapping and text formatting.

use crate::element::Element;
use crate::error::{ApiError, EngineError};
use crate::lock::LockKind;
use crate::manifest::Manifest;
use std::fmt::Write;
use std::sync::Arc;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::Engine(err @ EngineError::Aggregate(_)) => format_errors(&err.clone().into_errors()),
        other => other.to_string(),
    }
}

/// One problem per line, preceded by a count.
pub fn format_errors(errors: &[EngineError]) -> String {
    let mut out = format!("{} problem(s) found", errors.len());
    for error in errors {
        let _ = write!(out, "\n  {}", error);
    }
    out
}

/// Lockable attribute and element names of every node type.
pub fn format_schema(manifest: &Manifest) -> String {
    let mut out = String::new();
    for (name, schema) in manifest.types() {
        let element = Element::new(Arc::clone(schema));
        let marker = if name == manifest.root_name() {
            " (root)"
        } else {
            ""
        };
        let _ = writeln!(out, "{}{}", name, marker);
        let _ = writeln!(
            out,
            "  attributes: {}",
            list(&element.lockable_names(LockKind::Attributes))
        );
        let _ = writeln!(
            out,
            "  elements: {}",
            list(&element.lockable_names(LockKind::Elements))
        );
    }
    out.trim_end().to_string()
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
