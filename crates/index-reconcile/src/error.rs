//! Error types for the reconciliation library.

use thiserror::Error;

/// Main error type for reconciliation operations.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema document is malformed or missing required structure
    #[error("Schema error: {0}")]
    Schema(String),

    /// Database or index request failed
    #[error("Query failed against {target}: {message}")]
    Query { target: String, message: String },

    /// Index request returned a non-success status code
    #[error("Index request {endpoint} returned status {status}: {body}")]
    IndexStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A field could not be normalized (malformed timestamp, JSON, or type)
    #[error("Failed to parse field {field}: {message}")]
    Parse { field: String, message: String },

    /// One or more content workers failed; `last` is the last error observed
    #[error("{failed} of {dispatched} content workers failed; last error: {last}")]
    Workers {
        failed: usize,
        dispatched: usize,
        #[source]
        last: Box<ReconcileError>,
    },

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// HTTP transport error talking to the index
    #[error("Index transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        ReconcileError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Query error for the given store
    pub fn query(target: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::Query {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a Parse error for a field
    pub fn parse(field: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::Parse {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Configuration and schema problems exit with 2 so a wrapper can tell
    /// them apart from runtime failures against the stores.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReconcileError::Config(_) | ReconcileError::Schema(_) | ReconcileError::Yaml(_) => 2,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
