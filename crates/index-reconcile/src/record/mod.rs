//! Record normalization.
//!
//! Database rows and index documents arrive as [`RawRecord`]s whose body is a
//! map holding the root node (plus, for index documents, top-level pipeline
//! timestamps). [`RecordNormalizer`] rewrites every comparable field according
//! to its [`FieldType`] so both sides end up structurally comparable.

mod lag;
mod value;

pub use lag::{LagSink, LagTimestamps, NoopLagSink, PrometheusLagSink};
pub use value::Value;

use crate::error::{ReconcileError, Result};
use crate::schema::{FieldType, ParsedSchema};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A record as fetched from either store, keyed by its ID.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub body: Value,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// A normalized record: `{root: {field: value, ...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub id: String,
    pub value: Value,
}

/// Normalizes raw records against a parsed schema.
#[derive(Clone)]
pub struct RecordNormalizer {
    schema: Arc<ParsedSchema>,
    lag_sink: Arc<dyn LagSink>,
}

impl RecordNormalizer {
    pub fn new(schema: Arc<ParsedSchema>, lag_sink: Arc<dyn LagSink>) -> Self {
        Self { schema, lag_sink }
    }

    pub fn schema(&self) -> &ParsedSchema {
        &self.schema
    }

    /// Normalize one record, reporting its pipeline lag to the sink.
    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedRecord> {
        let value = normalize(&raw.body, &self.schema, self.lag_sink.as_ref())?;
        Ok(NormalizedRecord {
            id: raw.id.clone(),
            value,
        })
    }

    /// Normalize a batch, failing on the first malformed record.
    pub fn normalize_all(&self, raw: &[RawRecord]) -> Result<Vec<NormalizedRecord>> {
        raw.iter().map(|r| self.normalize(r)).collect()
    }
}

/// Normalize a raw record body into its canonical form.
pub fn normalize(raw: &Value, schema: &ParsedSchema, lag_sink: &dyn LagSink) -> Result<Value> {
    let root = raw
        .get(&schema.root_node)
        .and_then(Value::as_map)
        .ok_or_else(|| {
            ReconcileError::parse(
                &schema.root_node,
                format!("record has no '{}' object", schema.root_node),
            )
        })?;

    let mut fields = BTreeMap::new();
    for field in &schema.fields {
        let value = root.get(&field.name).cloned().unwrap_or(Value::Null);
        let normalized = normalize_field(&field.name, field.field_type, value)?;
        fields.insert(field.name.clone(), normalized);
    }

    lag_timestamps(raw, root).report(lag_sink);

    let mut wrapped = BTreeMap::new();
    wrapped.insert(schema.root_node.clone(), Value::Map(fields));
    Ok(Value::Map(wrapped))
}

fn lag_timestamps(raw: &Value, root: &BTreeMap<String, Value>) -> LagTimestamps {
    let top = |key: &str| raw.get(key).and_then(Value::as_f64);
    let nested = |key: &str| root.get(key).and_then(Value::as_f64);
    LagTimestamps {
        dbz_source_ms: nested("__dbz_source_ts_ms"),
        dbz_ms: nested("__dbz_ts_ms"),
        core_read_ms: top("__core_read_ms"),
        core_write_ms: top("__core_write_ms"),
        es_write_ms: top("__es_write_ms"),
    }
}

/// Apply the rule for one field type.
pub fn normalize_field(name: &str, field_type: FieldType, value: Value) -> Result<Value> {
    match field_type {
        FieldType::String => match value {
            Value::Null => Ok(Value::Text(String::new())),
            Value::Text(s) => Ok(Value::Text(s)),
            Value::Bytes(b) => Ok(Value::Text(String::from_utf8_lossy(&b).into_owned())),
            other => Err(mismatch(name, "text", &other)),
        },
        FieldType::DateNanos => match value {
            Value::Null => Ok(Value::Null),
            Value::Timestamp(ts) => Ok(Value::Timestamp(ts)),
            Value::Text(s) => parse_timestamp(name, &s).map(Value::Timestamp),
            other => Err(mismatch(name, "timestamp", &other)),
        },
        FieldType::Json => match value {
            Value::Null => Ok(Value::empty_map()),
            Value::Map(m) => Ok(Value::Map(m)),
            Value::Text(s) => parse_json_object(name, s.as_bytes()),
            Value::Bytes(b) => parse_json_object(name, &b),
            other => Err(mismatch(name, "JSON object", &other)),
        },
        FieldType::Boolean => match value {
            Value::Null | Value::Bool(_) => Ok(value),
            other => Err(mismatch(name, "boolean", &other)),
        },
        FieldType::Byte => match value {
            Value::Null | Value::Byte(_) => Ok(value),
            Value::Int(i) => u8::try_from(i)
                .map(Value::Byte)
                .map_err(|_| ReconcileError::parse(name, format!("{} is out of byte range", i))),
            other => Err(mismatch(name, "byte", &other)),
        },
        FieldType::Array => match value {
            Value::Null | Value::Text(_) => Ok(value),
            other => Err(mismatch(name, "array text", &other)),
        },
        FieldType::Passthrough => Ok(value),
    }
}

fn parse_timestamp(name: &str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ReconcileError::parse(name, format!("invalid RFC3339 timestamp '{}': {}", s, e)))
}

fn parse_json_object(name: &str, bytes: &[u8]) -> Result<Value> {
    let parsed: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ReconcileError::parse(name, format!("invalid JSON: {}", e)))?;
    match parsed {
        serde_json::Value::Object(_) => Ok(Value::from(parsed)),
        serde_json::Value::Null => Ok(Value::empty_map()),
        other => Err(ReconcileError::parse(
            name,
            format!("expected a JSON object, got {}", other),
        )),
    }
}

fn mismatch(name: &str, expected: &str, got: &Value) -> ReconcileError {
    ReconcileError::parse(
        name,
        format!("expected {}, got {} ({})", expected, got.type_name(), got),
    )
}
