//! Source-of-truth database access.

mod postgres;
mod sql;
mod tls;

pub use postgres::PgDataSource;
pub use sql::{quote_ident, quote_table, TableQueries};
pub use tls::SslMode;

use crate::error::Result;
use crate::record::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read access to the source-of-truth table.
///
/// ID sequences are returned sorted ascending; IDs are the text form of the
/// primary key.
#[async_trait]
pub trait DataSourceClient: Send + Sync {
    /// Total number of rows in the table.
    async fn count_table(&self) -> Result<u64>;

    /// IDs of rows modified within `[start, end)`.
    async fn ids_by_modified_on(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    /// The subset of `ids` present in the table.
    async fn ids_by_id_list(&self, ids: &[String]) -> Result<Vec<String>>;

    /// Full rows for `ids`, projected per the schema.
    async fn rows_by_ids(&self, ids: &[String]) -> Result<Vec<RawRecord>>;
}
