//! Configuration system for the Parley chat gateway.
//!
//! Provides TOML-based configuration with:
//! - Optional sections with defaults so partial files are valid
//! - Config file layering (user config + project-local overrides)
//! - Startup warnings for missing secrets and unusable limits

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{LoadedConfig, data_dir, default_log_dir, load_config, load_single};
pub use error::{ConfigError, Result};
pub use types::*;
