//! Elasticsearch wire types.

use serde::Deserialize;

/// `_count` response.
#[derive(Debug, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// `_search` and `_search/scroll` response.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,

    pub hits: Hits,
}

#[derive(Debug, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_source", default)]
    pub source: Option<serde_json::Value>,
}
