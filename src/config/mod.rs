//! Configuration module for dataflow-rs
//!
//! This module handles:
//! - Stage execution options ([`StageOptions`]) and their defaults
//! - Per-chain settings ([`DataflowSettings`]) handed to the builder
//! - The optional TOML configuration file ([`DataflowConfig`])
//!
//! # Config Location
//!
//! When no explicit path is given, the config file is looked up in the
//! platform-appropriate configuration directory under `dev.hxyulin.dataflow-rs`:
//!
//! - **Linux**: `~/.config/dev.hxyulin.dataflow-rs/dataflow.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.dataflow-rs/dataflow.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.dataflow-rs\dataflow.toml`
//!
//! # Example
//!
//! ```toml
//! [defaults]
//! bounded_capacity = 1000
//! max_degree_of_parallelism = 0   # 0 = hardware concurrency
//! ensure_ordered = false
//!
//! [stages.split]
//! max_degree_of_parallelism = 2
//! ensure_ordered = true
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{DataflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.dataflow-rs";

/// Config filename
pub const CONFIG_FILE: &str = "dataflow.toml";

/// Default number of items queued at a stage input
pub const DEFAULT_BOUNDED_CAPACITY: usize = 1000;

/// Capacity value meaning "no bound"
pub const UNBOUNDED: usize = 0;

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Contents of a dataflow configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataflowConfig {
    /// Options applied to every stage
    pub defaults: StageOptions,

    /// Per-stage overrides keyed by stage name
    pub stages: BTreeMap<String, StageOverride>,
}

impl DataflowConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataflowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            DataflowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load dataflow config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config file to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DataflowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        std::fs::write(path, content).map_err(|e| {
            DataflowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values that cannot describe a runnable stage
    pub fn validate(&self) -> Result<()> {
        if self.defaults.bounded_capacity > UNBOUNDED_CHANNEL_CAPACITY {
            return Err(DataflowError::Config(format!(
                "bounded_capacity {} exceeds the maximum of {}",
                self.defaults.bounded_capacity, UNBOUNDED_CHANNEL_CAPACITY
            )));
        }
        for (name, over) in &self.stages {
            if over
                .bounded_capacity
                .is_some_and(|c| c > UNBOUNDED_CHANNEL_CAPACITY)
            {
                return Err(DataflowError::Config(format!(
                    "stage '{}': bounded_capacity exceeds the maximum of {}",
                    name, UNBOUNDED_CHANNEL_CAPACITY
                )));
            }
        }
        Ok(())
    }

    /// Build builder settings from this config
    pub fn settings(&self) -> DataflowSettings {
        DataflowSettings::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config() {
        let content = r#"
            [defaults]
            bounded_capacity = 64
            ensure_ordered = true

            [stages.tokenize]
            max_degree_of_parallelism = 2
        "#;

        let config: DataflowConfig = toml::from_str(content).unwrap();
        assert_eq!(config.defaults.bounded_capacity, 64);
        assert_eq!(config.defaults.max_degree_of_parallelism, 0);
        assert!(config.defaults.ensure_ordered);
        assert_eq!(
            config.stages["tokenize"].max_degree_of_parallelism,
            Some(2)
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: DataflowConfig = toml::from_str("").unwrap();
        assert_eq!(config.defaults.bounded_capacity, DEFAULT_BOUNDED_CAPACITY);
        assert!(config.stages.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = DataflowConfig::default();
        config.defaults.bounded_capacity = 16;
        config.stages.insert(
            "join".to_string(),
            StageOverride {
                ensure_ordered: Some(true),
                ..Default::default()
            },
        );
        config.save(&path).unwrap();

        let loaded = DataflowConfig::load(&path).unwrap();
        assert_eq!(loaded.defaults.bounded_capacity, 16);
        assert_eq!(loaded.stages["join"].ensure_ordered, Some(true));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = DataflowConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, DataflowError::Config(_)));
    }

    #[test]
    fn test_load_rejects_bad_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[defaults]\nbounded_capacity = \"lots\"\n").unwrap();

        let err = DataflowConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = DataflowConfig::default();
        config.stages.insert(
            "split".to_string(),
            StageOverride {
                bounded_capacity: Some(5),
                ..Default::default()
            },
        );

        let settings = config.settings();
        assert_eq!(settings.options_for("split").bounded_capacity, 5);
        assert_eq!(
            settings.options_for("other").bounded_capacity,
            DEFAULT_BOUNDED_CAPACITY
        );
    }
}
