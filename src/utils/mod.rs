//! Configuration utilities.

#![allow(missing_docs)]

pub mod toml_config;

pub use toml_config::{ConfigError, RagConfig};
