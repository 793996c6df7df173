//! Configuration for the voice companion
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, then an optional env-named file)
//! - Environment variables (`COMPANION_` prefix, `__` separator)
//!
//! Every field has a sensible default, so the engine runs with no config
//! file at all.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AudioSettings, CompanionSettings, EngineSettings, ServiceSettings, Settings,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
