//! Runtime configuration: store directories and the partial-merge policy.
//!
//! Sources, lowest to highest precedence:
//! - defaults under the platform data directory
//! - an optional JSON file (`--config` or `XLSX_CONSOLIDATOR_CONFIG`)
//! - `XLSX_*` environment overrides

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_FILE_ENV: &str = "XLSX_CONSOLIDATOR_CONFIG";
pub const TEMPLATE_DIR_ENV: &str = "XLSX_TEMPLATE_DIR";
pub const CONSOLIDATION_DIR_ENV: &str = "XLSX_CONSOLIDATION_DIR";
pub const TEMP_DIR_ENV: &str = "XLSX_TEMP_DIR";
pub const PARTIAL_MERGE_POLICY_ENV: &str = "XLSX_PARTIAL_MERGE_POLICY";

const APP_DIR: &str = "xlsx-consolidator";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// What happens to an existing consolidated document when a request fails
/// after some of its documents were already merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialMergePolicy {
    /// Rows persisted before the failure stay
    #[default]
    Retain,
    /// The document's bytes from before the request are restored
    Rollback,
}

impl FromStr for PartialMergePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(PartialMergePolicy::Retain),
            "rollback" => Ok(PartialMergePolicy::Rollback),
            _ => Err(ConfigError::InvalidValue {
                key: PARTIAL_MERGE_POLICY_ENV.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PartialMergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialMergePolicy::Retain => write!(f, "retain"),
            PartialMergePolicy::Rollback => write!(f, "rollback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub template_dir: PathBuf,
    pub consolidation_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub partial_merge_policy: PartialMergePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Config::with_root(&base)
    }
}

impl Config {
    /// All three stores under one root directory
    pub fn with_root(root: &Path) -> Self {
        Config {
            template_dir: root.join("templates"),
            consolidation_dir: root.join("consolidated"),
            temp_dir: root.join("temp"),
            partial_merge_policy: PartialMergePolicy::default(),
        }
    }

    /// Load from the given file (or the one named by the environment),
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(file) => Config::from_file(&file)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Read a JSON config file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(TEMPLATE_DIR_ENV) {
            self.template_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(CONSOLIDATION_DIR_ENV) {
            self.consolidation_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(TEMP_DIR_ENV) {
            self.temp_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup(PARTIAL_MERGE_POLICY_ENV) {
            self.partial_merge_policy = policy.parse()?;
        }
        Ok(())
    }
}
