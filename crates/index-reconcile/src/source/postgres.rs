//! PostgreSQL data source.

use super::sql::TableQueries;
use super::tls::SslMode;
use super::DataSourceClient;
use crate::config::DatabaseConfig;
use crate::error::{ReconcileError, Result};
use crate::record::{RawRecord, Value};
use crate::schema::ParsedSchema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, BTreeSet};
use tokio_postgres::Config as PgConfig;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;
use tracing::{debug, info, warn};

/// Source-of-truth table reader backed by a deadpool-postgres pool.
pub struct PgDataSource {
    pool: Pool,
    queries: TableQueries,
    columns: Vec<String>,
    root_node: String,
    target: String,
}

impl PgDataSource {
    /// Connect to the database and verify the connection.
    pub async fn new(
        config: &DatabaseConfig,
        schema: &ParsedSchema,
        max_conns: usize,
    ) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("index-reconcile");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode: SslMode = config.ssl_mode.parse()?;
        let mgr = match ssl_mode.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| ReconcileError::pool(e, "creating PostgreSQL pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| ReconcileError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        let target = format!(
            "postgres {}:{}/{}",
            config.host, config.port, config.database
        );
        info!("Connected to {} (table {})", target, config.table);

        let mut queries = TableQueries::build(config, schema)?;
        let statement = client
            .prepare(queries.rows_by_ids.as_str())
            .await
            .map_err(|e| ReconcileError::query(&target, format!("{} ({})", e, queries.rows_by_ids)))?;
        // Column 0 is the ID; the rest follow the schema's field order.
        let text_casts: BTreeSet<String> = statement
            .columns()
            .iter()
            .skip(1)
            .zip(&schema.fields)
            .filter(|(column, _)| !decodes_natively(column.type_()))
            .map(|(column, field)| {
                debug!(
                    "{}: reading {} ({}) as text",
                    target,
                    field.name,
                    column.type_().name()
                );
                field.name.clone()
            })
            .collect();
        if !text_casts.is_empty() {
            queries = TableQueries::build_with_text_casts(config, schema, &text_casts)?;
        }

        Ok(Self {
            pool,
            queries,
            columns: schema.database_columns.clone(),
            root_node: schema.root_node.clone(),
            target,
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| ReconcileError::pool(e, format!("getting connection for {}", context)))
    }

    async fn query_ids(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<String>> {
        let client = self.client("id query").await?;
        let rows = client
            .query(sql, params)
            .await
            .map_err(|e| ReconcileError::query(&self.target, format!("{} ({})", e, sql)))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, String>(0)
                    .map_err(|e| ReconcileError::query(&self.target, e.to_string()))
            })
            .collect()
    }

    fn row_to_record(&self, row: &Row) -> Result<RawRecord> {
        let id: String = row
            .try_get(0)
            .map_err(|e| ReconcileError::query(&self.target, format!("reading id: {}", e)))?;

        let mut fields = BTreeMap::new();
        for (offset, name) in self.columns.iter().enumerate() {
            fields.insert(name.clone(), convert_pg_row_value(row, offset + 1, name)?);
        }

        let mut body = BTreeMap::new();
        body.insert(self.root_node.clone(), Value::Map(fields));
        Ok(RawRecord::new(id, Value::Map(body)))
    }
}

#[async_trait]
impl DataSourceClient for PgDataSource {
    async fn count_table(&self) -> Result<u64> {
        let client = self.client("count").await?;
        let row = client
            .query_one(self.queries.count.as_str(), &[])
            .await
            .map_err(|e| ReconcileError::query(&self.target, e.to_string()))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| ReconcileError::query(&self.target, e.to_string()))?;
        debug!("{}: count = {}", self.target, count);
        Ok(count.max(0) as u64)
    }

    async fn ids_by_modified_on(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ids = self
            .query_ids(&self.queries.ids_by_modified_on, &[&start, &end])
            .await?;
        debug!(
            "{}: {} ids modified in [{}, {})",
            self.target,
            ids.len(),
            start,
            end
        );
        Ok(ids)
    }

    async fn ids_by_id_list(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.query_ids(&self.queries.ids_by_id_list, &[&list]).await
    }

    async fn rows_by_ids(&self, ids: &[String]) -> Result<Vec<RawRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list: Vec<&str> = ids.iter().map(String::as_str).collect();
        let client = self.client("rows_by_ids").await?;
        let rows = client
            .query(self.queries.rows_by_ids.as_str(), &[&list])
            .await
            .map_err(|e| ReconcileError::query(&self.target, e.to_string()))?;
        rows.iter().map(|row| self.row_to_record(row)).collect()
    }
}

/// Whether [`convert_pg_row_value`] can decode a column of this type as-is.
pub(crate) fn decodes_natively(ty: &Type) -> bool {
    matches!(
        ty.name(),
        "bool"
            | "char"
            | "int2"
            | "int4"
            | "int8"
            | "float4"
            | "float8"
            | "numeric"
            | "timestamptz"
            | "timestamp"
            | "date"
            | "bytea"
            | "json"
            | "jsonb"
            | "text"
            | "varchar"
            | "bpchar"
            | "name"
            | "unknown"
    )
}

/// Decode one column by its PostgreSQL type name.
fn convert_pg_row_value(row: &Row, idx: usize, column: &str) -> Result<Value> {
    let type_name = row.columns()[idx].type_().name().to_string();
    let decode_err =
        |e: tokio_postgres::Error| ReconcileError::parse(column, format!("{} ({})", e, type_name));

    let value = match type_name.as_str() {
        "bool" => row.try_get::<_, Option<bool>>(idx).map_err(decode_err)?.map(Value::Bool),
        "char" => row
            .try_get::<_, Option<i8>>(idx)
            .map_err(decode_err)?
            .map(|v| Value::Int(v as i64)),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(decode_err)?
            .map(|v| Value::Int(v as i64)),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(decode_err)?
            .map(|v| Value::Int(v as i64)),
        "int8" => row.try_get::<_, Option<i64>>(idx).map_err(decode_err)?.map(Value::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(decode_err)?
            .map(|v| Value::number(v as f64)),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(decode_err)?
            .map(Value::number),
        "numeric" => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map_err(decode_err)?
            .map(|d| match d.to_i64() {
                Some(i) if d.fract().is_zero() => Value::Int(i),
                _ => Value::number(d.to_f64().unwrap_or(f64::NAN)),
            }),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(decode_err)?
            .map(Value::Timestamp),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map_err(decode_err)?
            .map(|ts| Value::Timestamp(ts.and_utc())),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(decode_err)?
            .map(|d| Value::Text(d.to_string())),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(decode_err)?
            .map(Value::Bytes),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(decode_err)?
            .map(Value::from),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(decode_err)?
            .map(Value::Text),
    };

    Ok(value.unwrap_or(Value::Null))
}
