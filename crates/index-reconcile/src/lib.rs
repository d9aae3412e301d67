//! # index-reconcile
//!
//! Audits a CDC-built Elasticsearch index against its PostgreSQL source table.
//!
//! A validation run has three phases, each stopping the run when invalid:
//!
//! - **Count** compares total rows with total documents
//! - **IDs** compares the IDs modified in a recent window, re-checking any
//!   mismatch by ID to compensate for pipeline lag
//! - **Content** normalizes both sides against the pipeline schema and diffs
//!   them field by field on a bounded worker pool
//!
//! ## Example
//!
//! ```rust,no_run
//! use index_reconcile::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> index_reconcile::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let run = orchestrator.run_config(chrono::Utc::now());
//!     let report = orchestrator.validate(&run).await?;
//!     println!("{}: {}", if report.is_valid() { "valid" } else { "invalid" }, report.message);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod orchestrator;
pub mod record;
pub mod schema;
pub mod source;
pub mod verify;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, IndexConfig, SchemaConfig, ValidationConfig};
pub use error::{ReconcileError, Result};
pub use index::{EsIndexClient, IndexClient};
pub use orchestrator::{load_schema, HealthCheckResult, Orchestrator};
pub use record::{LagSink, NoopLagSink, PrometheusLagSink, RawRecord, RecordNormalizer, Value};
pub use schema::{FieldType, ParsedSchema};
pub use source::{DataSourceClient, PgDataSource};
pub use verify::{Reason, RunConfig, ValidationReport, Validator, Verdict};
