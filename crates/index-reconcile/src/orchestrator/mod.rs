//! Wires configuration, schema and store clients into a [`Validator`].

use crate::config::Config;
use crate::error::Result;
use crate::index::EsIndexClient;
use crate::record::PrometheusLagSink;
use crate::schema::ParsedSchema;
use crate::source::{DataSourceClient, PgDataSource};
use crate::verify::{RunConfig, ValidationReport, Validator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Connected reconciliation run context.
pub struct Orchestrator {
    config: Config,
    schema: Arc<ParsedSchema>,
    validator: Validator,
    lag_sink: Arc<PrometheusLagSink>,
}

/// Result of probing both stores.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub database_connected: bool,
    pub database_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
    pub index_connected: bool,
    pub index_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
}

/// Load and parse the schema document named by the configuration.
pub fn load_schema(config: &Config) -> Result<ParsedSchema> {
    let document = config.load_schema_document()?;
    ParsedSchema::parse(&document)
}

fn index_client(config: &Config, schema: &ParsedSchema) -> Result<EsIndexClient> {
    EsIndexClient::new(
        &config.index,
        &schema.root_node,
        &config.database.id_column,
        &config.database.modified_on_column,
    )
}

impl Orchestrator {
    /// Parse the schema and connect to both stores.
    pub async fn new(config: Config) -> Result<Self> {
        let schema = Arc::new(load_schema(&config)?);
        let max_conns = config
            .database
            .get_max_connections(config.validation.get_content_workers());
        let db = PgDataSource::new(&config.database, &schema, max_conns).await?;
        let index = index_client(&config, &schema)?;
        let lag_sink = Arc::new(PrometheusLagSink::new()?);

        let validator = Validator::new(
            Arc::new(db),
            Arc::new(index),
            schema.clone(),
            lag_sink.clone(),
        );

        Ok(Self {
            config,
            schema,
            validator,
            lag_sink,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &ParsedSchema {
        &self.schema
    }

    /// Run parameters for an attempt anchored at `now`.
    pub fn run_config(&self, now: DateTime<Utc>) -> RunConfig {
        self.config.run_config(now)
    }

    /// Run one validation.
    pub async fn validate(&self, run: &RunConfig) -> Result<ValidationReport> {
        self.validator.validate(run).await
    }

    /// Last observed lag gauges in Prometheus text format.
    pub fn metrics(&self) -> Result<String> {
        self.lag_sink.gather_and_encode()
    }

    /// Check the database and index connections independently.
    ///
    /// Connection failures are reported in the result; only an unusable
    /// schema is an error.
    pub async fn health_check(config: &Config) -> Result<HealthCheckResult> {
        let schema = load_schema(config)?;

        let start = Instant::now();
        let database = match PgDataSource::new(&config.database, &schema, 1).await {
            Ok(db) => db.count_table().await.map(|_| ()),
            Err(e) => Err(e),
        };
        let database_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let index = match index_client(config, &schema) {
            Ok(client) => client.ping().await,
            Err(e) => Err(e),
        };
        let index_latency_ms = start.elapsed().as_millis() as u64;

        let database_error = database.err().map(|e| e.to_string());
        let index_error = index.err().map(|e| e.to_string());
        if let Some(ref e) = database_error {
            warn!("Database health check failed: {}", e);
        }
        if let Some(ref e) = index_error {
            warn!("Index health check failed: {}", e);
        }

        let result = HealthCheckResult {
            healthy: database_error.is_none() && index_error.is_none(),
            database_connected: database_error.is_none(),
            database_latency_ms,
            database_error,
            index_connected: index_error.is_none(),
            index_latency_ms,
            index_error,
        };
        info!("Health check: healthy = {}", result.healthy);
        Ok(result)
    }
}
