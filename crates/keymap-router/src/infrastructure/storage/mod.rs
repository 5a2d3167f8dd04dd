//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory, recovers from broken files by backing
//! them up and writing defaults, and persists validated changes.

pub mod config;

pub use config::{ConfigError, ConfigRepository, TomlConfigRepository};
