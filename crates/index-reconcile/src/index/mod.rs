//! Search index access.

mod elasticsearch;
mod types;

pub use elasticsearch::{EsIndexClient, ID_LIST_CHUNK_SIZE, SCROLL_KEEP_ALIVE, SCROLL_PAGE_SIZE};
pub use types::{CountResponse, Hit, Hits, SearchResponse};

use crate::error::Result;
use crate::record::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read access to the derived search index.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Total number of documents in the index.
    async fn count_index(&self) -> Result<u64>;

    /// IDs of documents modified within `[start, end)`, sorted ascending.
    async fn ids_by_modified_on(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    /// The subset of `ids` present in the index, sorted ascending.
    async fn ids_by_id_list(&self, ids: &[String]) -> Result<Vec<String>>;

    /// Full documents for `ids`, sorted by ID.
    async fn documents_by_ids(&self, ids: &[String]) -> Result<Vec<RawRecord>>;
}
