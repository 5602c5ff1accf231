//! CLI parse: clap types for confstack. No behavior beyond argument parsing.

use crate::element::SaveMode;
use crate::error::ApiError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// confstack - layered configuration with locks and minimal-delta saves
#[derive(Parser)]
#[command(name = "confstack")]
#[command(about = "Resolve, check and edit stacks of configuration levels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Settings file path (layered above the workspace settings)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration of a level
    Resolve {
        /// Level name (default: the top level)
        #[arg(long)]
        level: Option<String>,
    },
    /// Parse every level and report all problems
    Check,
    /// Edit the top level and print what it would save
    Set {
        /// Edits of the form [path/]name@attribute=value
        #[arg(required = true)]
        edits: Vec<EditSpec>,
        /// Save mode (minimal, modified, full); defaults to the settings
        #[arg(long)]
        mode: Option<SaveMode>,
        /// Write the result back to the top level file
        #[arg(long)]
        write: bool,
    },
    /// List the lockable names of every node type
    Schema,
}

/// One step of an edit path: a child element, or a collection member when
/// a key is given as `name[key]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub key: Option<String>,
}

impl FromStr for PathSegment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('[') {
            None if !s.is_empty() => Ok(PathSegment {
                name: s.to_string(),
                key: None,
            }),
            None => Err("empty path segment".to_string()),
            Some((name, rest)) => {
                let key = rest
                    .strip_suffix(']')
                    .ok_or_else(|| format!("unterminated key in '{}'", s))?;
                if name.is_empty() || key.is_empty() {
                    return Err(format!("malformed segment '{}'", s));
                }
                Ok(PathSegment {
                    name: name.to_string(),
                    key: Some(key.to_string()),
                })
            }
        }
    }
}

/// `[path/]name@attribute=value`. An empty element path addresses the
/// section root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSpec {
    pub path: Vec<PathSegment>,
    pub attribute: String,
    pub value: String,
}

impl FromStr for EditSpec {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ApiError::InvalidEdit(s.to_string());
        let (target, assignment) = s.rsplit_once('@').ok_or_else(invalid)?;
        let (attribute, value) = assignment.split_once('=').ok_or_else(invalid)?;
        if attribute.is_empty() {
            return Err(invalid());
        }
        let path = if target.is_empty() {
            Vec::new()
        } else {
            target
                .split('/')
                .map(PathSegment::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid())?
        };
        Ok(EditSpec {
            path,
            attribute: attribute.to_string(),
            value: value.to_string(),
        })
    }
}
