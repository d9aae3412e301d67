//! Configuration validation.

use super::Config;
use crate::error::{ReconcileError, Result};
use crate::source::SslMode;

/// Longest ID window accepted: one hundred years.
pub const MAX_PERIOD_MINUTES: i64 = 100 * 365 * 24 * 60;

/// Largest lag compensation accepted: one hundred years.
pub const MAX_LAG_COMPENSATION_SECONDS: i64 = MAX_PERIOD_MINUTES * 60;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Database validation
    if config.database.host.is_empty() {
        return Err(ReconcileError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(ReconcileError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(ReconcileError::Config("database.user is required".into()));
    }
    if config.database.table.is_empty() {
        return Err(ReconcileError::Config("database.table is required".into()));
    }
    if config.database.id_column.is_empty() || config.database.modified_on_column.is_empty() {
        return Err(ReconcileError::Config(
            "database.id_column and database.modified_on_column cannot be empty".into(),
        ));
    }

    config.database.ssl_mode.parse::<SslMode>()?;

    // Index validation
    if config.index.url.is_empty() {
        return Err(ReconcileError::Config("index.url is required".into()));
    }
    if !config.index.url.starts_with("http://") && !config.index.url.starts_with("https://") {
        return Err(ReconcileError::Config(format!(
            "index.url must start with http:// or https://, got '{}'",
            config.index.url
        )));
    }
    if config.index.index.is_empty() {
        return Err(ReconcileError::Config("index.index is required".into()));
    }
    if config.index.password.is_some() && config.index.username.is_none() {
        return Err(ReconcileError::Config(
            "index.password is set but index.username is missing".into(),
        ));
    }

    // Schema source
    match (&config.schema.inline, &config.schema.path) {
        (None, None) => {
            return Err(ReconcileError::Config(
                "schema.inline or schema.path is required".into(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(ReconcileError::Config(
                "schema.inline and schema.path are mutually exclusive".into(),
            ))
        }
        _ => {}
    }

    // Validation knobs - only check if explicitly set
    let v = &config.validation;
    if !(1..=MAX_PERIOD_MINUTES).contains(&v.period_minutes) {
        return Err(ReconcileError::Config(format!(
            "validation.period_minutes must be between 1 and {}",
            MAX_PERIOD_MINUTES
        )));
    }
    if !(0..=MAX_LAG_COMPENSATION_SECONDS).contains(&v.lag_compensation_seconds) {
        return Err(ReconcileError::Config(format!(
            "validation.lag_compensation_seconds must be between 0 and {}",
            MAX_LAG_COMPENSATION_SECONDS
        )));
    }
    if v.invalid_threshold_percent > 100 {
        return Err(ReconcileError::Config(
            "validation.invalid_threshold_percent must be between 0 and 100".into(),
        ));
    }
    if let Some(0) = v.content_chunk_size {
        return Err(ReconcileError::Config(
            "validation.content_chunk_size must be at least 1".into(),
        ));
    }
    if let Some(0) = v.content_workers {
        return Err(ReconcileError::Config(
            "validation.content_workers must be at least 1".into(),
        ));
    }
    if v.attempts == 0 {
        return Err(ReconcileError::Config(
            "validation.attempts must be at least 1".into(),
        ));
    }

    Ok(())
}
