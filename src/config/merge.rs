//! Merge rules for settings sources.

pub mod merge_policy;
