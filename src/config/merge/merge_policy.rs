//! Merge rules: defaults, override order, conflict handling.
//!
//! Later sources override earlier ones key by key; tables merge, arrays are
//! replaced whole.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

pub const DEFAULT_SAVE_MODE: &str = "minimal";
pub const DEFAULT_SECTION: &str = "configuration";

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("engine.save_mode", DEFAULT_SAVE_MODE)?
        .set_default("engine.section", DEFAULT_SECTION)
}
