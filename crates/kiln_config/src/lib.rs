//! Parsing and validation of `kiln.toml` configuration files.
//!
//! This crate reads the optional configuration file and produces a strongly-typed
//! [`KilnConfig`] holding compiler pass switches and simulator settings. Every
//! field has a default, so an empty file (or no file at all) is a valid setup.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE_NAME};
pub use types::*;
