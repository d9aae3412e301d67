//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{ReconcileError, Result};
use crate::verify::RunConfig;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Environment variable consulted when `database.password` is empty.
pub const DB_PASSWORD_ENV: &str = "INDEX_RECONCILE_DB_PASSWORD";

/// Environment variable consulted when `index.password` is unset.
pub const INDEX_PASSWORD_ENV: &str = "INDEX_RECONCILE_INDEX_PASSWORD";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Fill credentials left out of the file from the environment.
    pub fn apply_env_overrides(&mut self) {
        if self.database.password.is_empty() {
            if let Ok(password) = std::env::var(DB_PASSWORD_ENV) {
                self.database.password = password;
            }
        }
        if self.index.password.is_none() {
            self.index.password = std::env::var(INDEX_PASSWORD_ENV).ok();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Read the schema document named by the `schema` section.
    pub fn load_schema_document(&self) -> Result<String> {
        match (&self.schema.inline, &self.schema.path) {
            (Some(inline), _) => Ok(inline.clone()),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                ReconcileError::Config(format!("cannot read schema file {:?}: {}", path, e))
            }),
            (None, None) => Err(ReconcileError::Config(
                "schema.inline or schema.path is required".into(),
            )),
        }
    }

    /// Build the per-run parameters for a validation anchored at `now`.
    pub fn run_config(&self, now: DateTime<Utc>) -> RunConfig {
        let v = &self.validation;
        RunConfig {
            period_minutes: v.period_minutes,
            lag_compensation_seconds: v.lag_compensation_seconds,
            validate_everything: v.validate_everything,
            invalid_threshold_percent: v.invalid_threshold_percent,
            now,
            content_chunk_size: v.get_content_chunk_size(),
            content_workers: v.get_content_workers(),
            preview_limit: v.get_preview_limit(),
        }
    }
}

impl DatabaseConfig {
    /// Pool size, scaled with the content worker count when not set.
    pub fn get_max_connections(&self, content_workers: usize) -> usize {
        self.max_connections
            .unwrap_or_else(|| (content_workers * 2).clamp(4, 64))
    }
}
