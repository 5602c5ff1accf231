//! CLI domain: parse, route and output only.
//! The single route table dispatches to the section facade.

mod output;
mod parse;
mod route;

pub use output::{format_errors, format_schema, map_error};
pub use parse::{Cli, Commands, EditSpec, PathSegment};
pub use route::RunContext;
