//! Configuration loading and parsing.
//!
//! This module provides the YAML configuration for the scheduler, the
//! per-job enablement switches and the store.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{ApplicationConfig, Config, JobSchedulerConfig, StorageConfig};
pub use yaml::YamlLoader;
