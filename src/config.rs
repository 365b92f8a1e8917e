//! Static settings: worker budget, backend program, repository targets

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_WORKERS: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_TURNS: u32 = 40;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Per-repository invocation limits and location (immutable after load)
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryTarget {
    /// Repository root the backend runs against (its working directory)
    pub root: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

impl RepositoryTarget {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Process-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Maximum concurrent in-flight requests across all conversations
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Analysis program to invoke (overridable for testing)
    #[serde(default = "default_backend_program")]
    pub backend_program: String,
    /// Served repositories, keyed by target id
    pub targets: HashMap<String, RepositoryTarget>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

fn default_backend_program() -> String {
    "claude".to_string()
}

impl Settings {
    /// Load and validate settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one repository target is required".into(),
            ));
        }
        for (id, target) in &self.targets {
            if target.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "target '{id}': timeout_secs must be nonzero"
                )));
            }
            if target.max_turns == 0 {
                return Err(ConfigError::Invalid(format!(
                    "target '{id}': max_turns must be nonzero"
                )));
            }
        }
        Ok(())
    }
}
