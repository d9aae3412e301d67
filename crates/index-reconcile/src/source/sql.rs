//! SQL text for the reconciliation queries.
//!
//! Identifiers cannot be bound as parameters, so table and column names are
//! validated and double-quoted here. Every value (timestamps, ID lists) is bound.

use crate::config::DatabaseConfig;
use crate::error::{ReconcileError, Result};
use crate::schema::ParsedSchema;
use std::collections::BTreeSet;

/// PostgreSQL truncates identifiers at 63 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate and double-quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(ReconcileError::Config("Identifier cannot be empty".into()));
    }
    if name.contains('\0') {
        return Err(ReconcileError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ReconcileError::Config(format!(
            "Identifier exceeds {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a possibly schema-qualified table name (`schema.table`).
pub fn quote_table(name: &str) -> Result<String> {
    match name.split_once('.') {
        Some((schema, table)) => Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?)),
        None => quote_ident(name),
    }
}

/// Prepared query text for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQueries {
    pub count: String,
    pub ids_by_modified_on: String,
    pub ids_by_id_list: String,
    pub rows_by_ids: String,
}

impl TableQueries {
    /// Build the queries for the configured table and schema projection.
    ///
    /// `rows_by_ids` selects the ID as text first, followed by the schema's
    /// database columns in order.
    pub fn build(config: &DatabaseConfig, schema: &ParsedSchema) -> Result<Self> {
        Self::build_with_text_casts(config, schema, &BTreeSet::new())
    }

    /// Like [`TableQueries::build`], additionally reading `text_casts` as text.
    pub fn build_with_text_casts(
        config: &DatabaseConfig,
        schema: &ParsedSchema,
        text_casts: &BTreeSet<String>,
    ) -> Result<Self> {
        let table = quote_table(&config.table)?;
        let id = quote_ident(&config.id_column)?;
        let modified_on = quote_ident(&config.modified_on_column)?;

        let mut projection = vec![format!("{}::text", id)];
        for field in &schema.fields {
            let column = quote_ident(&field.name)?;
            if field.field_type.reads_as_text() || text_casts.contains(&field.name) {
                projection.push(format!("{}::text AS {}", column, column));
            } else {
                projection.push(column);
            }
        }

        Ok(Self {
            count: format!("SELECT count(*) FROM {}", table),
            ids_by_modified_on: format!(
                "SELECT {id}::text FROM {table} \
                 WHERE {m} >= $1::timestamptz AND {m} < $2::timestamptz ORDER BY {id}",
                id = id,
                table = table,
                m = modified_on
            ),
            ids_by_id_list: format!(
                "SELECT {id}::text FROM {table} WHERE {id}::text = ANY($1::text[]) ORDER BY {id}",
                id = id,
                table = table
            ),
            rows_by_ids: format!(
                "SELECT {cols} FROM {table} WHERE {id}::text = ANY($1::text[]) ORDER BY {id}",
                cols = projection.join(", "),
                table = table,
                id = id
            ),
        })
    }
}
