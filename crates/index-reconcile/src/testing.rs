//! Shared fixtures for unit tests.

use crate::config::DatabaseConfig;
use crate::error::{ReconcileError, Result};
use crate::index::IndexClient;
use crate::record::{LagSink, RawRecord, Value};
use crate::schema::ParsedSchema;
use crate::source::DataSourceClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A hosts pipeline schema covering every field type.
pub const HOSTS_SCHEMA: &str = r#"{
  "type": "record",
  "name": "Value",
  "namespace": "xjoinindexpipeline.hosts",
  "fields": [
    {
      "name": "host",
      "type": {
        "type": "record",
        "name": "Host",
        "fields": [
          {"name": "id", "type": {"type": "string", "xjoin.type": "string"}},
          {"name": "account", "type": ["null", {"type": "string", "xjoin.type": "string"}]},
          {"name": "display_name", "type": ["null", {"type": "string", "xjoin.type": "string"}]},
          {"name": "modified_on", "type": {"type": "string", "xjoin.type": "date_nanos"}},
          {"name": "facts", "type": ["null", {"type": "string", "xjoin.type": "json"}]},
          {"name": "tags", "type": ["null", {"type": "string", "xjoin.type": "json"}]},
          {"name": "tags_structured", "type": ["null", {"type": "string", "xjoin.type": "array"}]},
          {"name": "stale", "type": ["null", {"type": "boolean", "xjoin.type": "boolean"}]},
          {"name": "groups", "type": ["null", {"type": "string", "xjoin.type": "array"}]},
          {"name": "__dbz_source_ts_ms", "type": ["null", "long"]},
          {"name": "per_reporter_staleness", "type": ["null", {"type": "string"}]}
        ]
      }
    }
  ],
  "transformations": [
    {
      "input.field": "host.tags",
      "output.field": "host.tags_structured",
      "type": "to_structured_tags"
    }
  ]
}"#;

pub fn hosts_schema() -> ParsedSchema {
    ParsedSchema::parse(HOSTS_SCHEMA).unwrap()
}

pub fn database_config() -> DatabaseConfig {
    DatabaseConfig {
        host: "localhost".into(),
        port: 5432,
        database: "inventory".into(),
        user: "reconcile".into(),
        password: "secret".into(),
        table: "hosts".into(),
        ssl_mode: "disable".into(),
        id_column: "id".into(),
        modified_on_column: "modified_on".into(),
        max_connections: None,
    }
}

/// Every lag value a [`RecordingLagSink`] received.
#[derive(Debug, Default, Clone)]
pub struct ObservedLags {
    pub total: Vec<f64>,
    pub debezium: Vec<f64>,
    pub core: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct RecordingLagSink {
    observed: Mutex<ObservedLags>,
}

impl RecordingLagSink {
    pub fn observed(&self) -> ObservedLags {
        self.observed.lock().unwrap().clone()
    }
}

impl LagSink for RecordingLagSink {
    fn observe_total_record_lag(&self, lag_ms: f64) {
        self.observed.lock().unwrap().total.push(lag_ms);
    }

    fn observe_debezium_lag(&self, lag_ms: f64) {
        self.observed.lock().unwrap().debezium.push(lag_ms);
    }

    fn observe_core_lag(&self, lag_ms: f64) {
        self.observed.lock().unwrap().core.push(lag_ms);
    }
}

/// A host as stored on either side.
#[derive(Debug, Clone)]
pub struct Host {
    pub id: String,
    pub display_name: String,
    pub modified_on: DateTime<Utc>,
    pub facts: serde_json::Value,
}

impl Host {
    pub fn new(id: &str, modified_on: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            display_name: format!("host-{}", id),
            modified_on,
            facts: json!({}),
        }
    }

    /// Index-side document body.
    pub fn document(&self) -> Value {
        Value::from(json!({
            "host": {
                "id": self.id,
                "account": null,
                "display_name": self.display_name,
                "modified_on": self.modified_on.to_rfc3339(),
                "facts": self.facts,
                "tags": null,
                "tags_structured": [],
                "stale": false,
                "groups": "[]",
                "per_reporter_staleness": {}
            }
        }))
    }

    /// Database-side row body: JSON columns read as text, timestamps native.
    pub fn row(&self) -> Value {
        let mut host = BTreeMap::new();
        host.insert("id".to_string(), Value::Text(self.id.clone()));
        host.insert("account".to_string(), Value::Null);
        host.insert(
            "display_name".to_string(),
            Value::Text(self.display_name.clone()),
        );
        host.insert("modified_on".to_string(), Value::Timestamp(self.modified_on));
        host.insert("facts".to_string(), Value::Text(self.facts.to_string()));
        host.insert("tags".to_string(), Value::Null);
        host.insert("stale".to_string(), Value::Bool(false));
        host.insert("groups".to_string(), Value::Text("[]".into()));
        host.insert("per_reporter_staleness".to_string(), Value::empty_map());
        let mut body = BTreeMap::new();
        body.insert("host".to_string(), Value::Map(host));
        Value::Map(body)
    }
}

/// In-memory store that serves as either side of a reconciliation.
///
/// `pending` hosts are invisible to windowed reads but visible to reads by ID,
/// modelling records that land between the two passes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hosts: Mutex<BTreeMap<String, Host>>,
    pending: Mutex<BTreeMap<String, Host>>,
    count_override: Mutex<Option<u64>>,
    fail_rows_after: Mutex<Option<usize>>,
    row_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_hosts(hosts: impl IntoIterator<Item = Host>) -> Self {
        let store = Self::default();
        for host in hosts {
            store.put(host);
        }
        store
    }

    pub fn put(&self, host: Host) {
        self.hosts.lock().unwrap().insert(host.id.clone(), host);
    }

    /// Visible only to ID-list and row reads.
    pub fn put_pending(&self, host: Host) {
        self.pending.lock().unwrap().insert(host.id.clone(), host);
    }

    pub fn set_count(&self, count: u64) {
        *self.count_override.lock().unwrap() = Some(count);
    }

    /// Make row reads fail once `calls` reads have succeeded.
    pub fn fail_rows_after(&self, calls: usize) {
        *self.fail_rows_after.lock().unwrap() = Some(calls);
    }

    /// Number of row reads attempted.
    pub fn row_calls(&self) -> usize {
        self.row_calls.load(Ordering::SeqCst)
    }

    fn count(&self) -> u64 {
        self.count_override
            .lock()
            .unwrap()
            .unwrap_or(self.hosts.lock().unwrap().len() as u64)
    }

    fn windowed(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
        self.hosts
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.modified_on >= start && h.modified_on < end)
            .map(|h| h.id.clone())
            .collect()
    }

    fn lookup(&self, ids: &[String]) -> Vec<Host> {
        let hosts = self.hosts.lock().unwrap();
        let pending = self.pending.lock().unwrap();
        let mut found: Vec<Host> = ids
            .iter()
            .filter_map(|id| hosts.get(id).or_else(|| pending.get(id)).cloned())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        found
    }

    fn check_row_failure(&self) -> Result<()> {
        let call = self.row_calls.fetch_add(1, Ordering::SeqCst);
        match *self.fail_rows_after.lock().unwrap() {
            Some(limit) if call >= limit => Err(ReconcileError::query(
                "memory store",
                format!("injected failure on call {}", call),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DataSourceClient for MemoryStore {
    async fn count_table(&self) -> Result<u64> {
        Ok(self.count())
    }

    async fn ids_by_modified_on(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        Ok(self.windowed(start, end))
    }

    async fn ids_by_id_list(&self, ids: &[String]) -> Result<Vec<String>> {
        Ok(self.lookup(ids).into_iter().map(|h| h.id).collect())
    }

    async fn rows_by_ids(&self, ids: &[String]) -> Result<Vec<RawRecord>> {
        self.check_row_failure()?;
        Ok(self
            .lookup(ids)
            .into_iter()
            .map(|h| RawRecord::new(h.id.clone(), h.row()))
            .collect())
    }
}

#[async_trait]
impl IndexClient for MemoryStore {
    async fn count_index(&self) -> Result<u64> {
        Ok(self.count())
    }

    async fn ids_by_modified_on(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        Ok(self.windowed(start, end))
    }

    async fn ids_by_id_list(&self, ids: &[String]) -> Result<Vec<String>> {
        Ok(self.lookup(ids).into_iter().map(|h| h.id).collect())
    }

    async fn documents_by_ids(&self, ids: &[String]) -> Result<Vec<RawRecord>> {
        Ok(self
            .lookup(ids)
            .into_iter()
            .map(|h| RawRecord::new(h.id.clone(), h.document()))
            .collect())
    }
}
