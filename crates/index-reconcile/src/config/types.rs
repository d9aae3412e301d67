//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source-of-truth database (PostgreSQL).
    pub database: DatabaseConfig,

    /// Derived search index (Elasticsearch).
    pub index: IndexConfig,

    /// Where to load the pipeline schema document from.
    pub schema: SchemaConfig,

    /// Reconciliation behavior.
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Source database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. May be left empty and supplied via `INDEX_RECONCILE_DB_PASSWORD`.
    #[serde(default)]
    pub password: String,

    /// Table to reconcile, optionally schema-qualified (`public.hosts`).
    pub table: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Primary key column holding the record ID.
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Column holding the last-modified timestamp.
    #[serde(default = "default_modified_on_column")]
    pub modified_on_column: String,

    /// Maximum pooled connections. Defaults to twice the content workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("table", &self.table)
            .field("ssl_mode", &self.ssl_mode)
            .field("id_column", &self.id_column)
            .field("modified_on_column", &self.modified_on_column)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Search index (Elasticsearch) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`.
    pub url: String,

    /// Index (or alias) name.
    pub index: String,

    /// Basic auth username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Basic auth password. May be supplied via `INDEX_RECONCILE_INDEX_PASSWORD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexConfig")
            .field("url", &self.url)
            .field("index", &self.index)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Schema document source: exactly one of `inline` or `path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Schema JSON embedded in the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,

    /// Path to a schema JSON file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Reconciliation behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Width of the ID window in minutes (default: 60).
    #[serde(default = "default_period_minutes")]
    pub period_minutes: i64,

    /// Seconds subtracted from "now" to let the pipeline catch up (default: 0).
    #[serde(default)]
    pub lag_compensation_seconds: i64,

    /// Validate the whole dataset instead of the recent window.
    #[serde(default)]
    pub validate_everything: bool,

    /// Percentage of content mismatches tolerated (default: 5).
    #[serde(default = "default_invalid_threshold_percent")]
    pub invalid_threshold_percent: u32,

    /// IDs per content chunk (default: 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_chunk_size: Option<usize>,

    /// Concurrent content workers (default: 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_workers: Option<usize>,

    /// Maximum IDs and records shown in report previews (default: 50).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_limit: Option<usize>,

    /// Validation attempts made by the CLI before giving up (default: 1).
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Seconds between attempts (default: 30).
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            period_minutes: default_period_minutes(),
            lag_compensation_seconds: 0,
            validate_everything: false,
            invalid_threshold_percent: default_invalid_threshold_percent(),
            content_chunk_size: None,
            content_workers: None,
            preview_limit: None,
            attempts: default_attempts(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl ValidationConfig {
    pub fn get_content_chunk_size(&self) -> usize {
        self.content_chunk_size.unwrap_or(100)
    }

    pub fn get_content_workers(&self) -> usize {
        self.content_workers.unwrap_or(10)
    }

    pub fn get_preview_limit(&self) -> usize {
        self.preview_limit.unwrap_or(50)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_modified_on_column() -> String {
    "modified_on".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_period_minutes() -> i64 {
    60
}

fn default_invalid_threshold_percent() -> u32 {
    5
}

fn default_attempts() -> u32 {
    1
}

fn default_interval_seconds() -> u64 {
    30
}
