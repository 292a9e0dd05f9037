// FILE: src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_WORKERS;
use crate::error::{CatalogError, Result};

pub const ENV_DATABASE: &str = "MEDIACAT_DB";
pub const ENV_WORKERS: &str = "MEDIACAT_WORKERS";

/// Runtime settings, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_workers")]
    pub fingerprint_workers: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Imported on top of the built-in media extensions.
    #[serde(default)]
    pub extra_extensions: Vec<String>,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mediacat")
        .join("catalog.db")
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            fingerprint_workers: default_workers(),
            busy_timeout_ms: default_busy_timeout_ms(),
            log_level: default_log_level(),
            extra_extensions: Vec::new(),
        }
    }
}

impl CatalogConfig {
    /// Load `path` if given (it must exist), apply environment overrides and
    /// validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| CatalogError::Config(format!("invalid config: {}", e)))
    }

    /// Override fields from the environment. `lookup` stands in for
    /// `std::env::var` so tests don't mutate process state.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(db) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.fingerprint_workers = workers
                .trim()
                .parse()
                .map_err(|_| CatalogError::Config(format!("{} must be a number, got '{}'", ENV_WORKERS, workers)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(CatalogError::Config("database_path cannot be empty".into()));
        }
        if self.fingerprint_workers == 0 {
            return Err(CatalogError::Config("fingerprint_workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = CatalogConfig::from_json(r#"{ "fingerprint_workers": 8, "extra_extensions": ["cbz"] }"#).unwrap();
        assert_eq!(config.fingerprint_workers, 8);
        assert_eq!(config.extra_extensions, vec!["cbz".to_string()]);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.log_level, "warn");
        assert!(config.database_path.ends_with("mediacat/catalog.db"));
    }

    #[test]
    fn env_overrides_and_validation() {
        let mut config = CatalogConfig::default();
        config
            .apply_env(|key| match key {
                ENV_DATABASE => Some("/tmp/x.db".into()),
                ENV_WORKERS => Some("0".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert!(matches!(config.validate(), Err(CatalogError::Config(_))));

        let mut config = CatalogConfig::default();
        assert!(config.apply_env(|_| Some("many".into())).is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(CatalogConfig::from_json("{ nope"), Err(CatalogError::Config(_))));
    }
}
