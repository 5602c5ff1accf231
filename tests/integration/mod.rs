//! Integration tests for the confstack level engine

mod cli_commands;
mod collection_semantics;
mod element_inheritance;
mod level_stack;
mod lock_enforcement;
pub mod test_utils;
