//! Snapshot subsystem configuration
//!
//! Supports YAML configuration files with serde-backed defaults

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Snapshot configuration for one partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Partition root directory (holds runtime/, pending/ and snapshots/)
    pub root_dir: PathBuf,
    /// Number of committed snapshots to retain; older ones are purged
    #[serde(default = "default_max_retained_snapshots")]
    pub max_retained_snapshots: usize,
}

impl SnapshotConfig {
    /// Configuration with defaults for the given partition root
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_retained_snapshots: default_max_retained_snapshots(),
        }
    }

    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

fn default_max_retained_snapshots() -> usize {
    3
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}
