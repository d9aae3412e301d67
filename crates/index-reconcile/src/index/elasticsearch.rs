//! Elasticsearch index client over the REST API.
//!
//! ID queries use scroll pagination (`sort=_doc`, only the ID field in
//! `_source`) and follow the scroll until a page comes back empty. Explicit ID
//! lists are split into chunks so a single ids filter never exceeds the
//! cluster's result window.

use super::types::{CountResponse, SearchResponse};
use super::IndexClient;
use crate::config::IndexConfig;
use crate::error::{ReconcileError, Result};
use crate::record::{RawRecord, Value};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hits per scroll page.
pub const SCROLL_PAGE_SIZE: usize = 5_000;

/// Scroll context keep-alive, renewed on every page.
pub const SCROLL_KEEP_ALIVE: &str = "1m";

/// Maximum IDs in one ids filter.
pub const ID_LIST_CHUNK_SIZE: usize = 10_000;

/// Search index reader backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct EsIndexClient {
    client: reqwest::Client,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
    id_path: String,
    modified_on_path: String,
}

impl EsIndexClient {
    /// Build a client for `config.index`.
    ///
    /// `id_field` and `modified_on_field` are root-record field names; the
    /// index addresses them as `<root>.<field>`.
    pub fn new(
        config: &IndexConfig,
        root_node: &str,
        id_field: &str,
        modified_on_field: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            id_path: format!("{}.{}", root_node, id_field),
            modified_on_path: format!("{}.{}", root_node, modified_on_field),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Send a request and decode the JSON body, mapping non-success statuses.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<T> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ReconcileError::IndexStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    /// Run an ID query and follow the scroll until an empty page.
    async fn scroll_ids(&self, query: serde_json::Value) -> Result<Vec<String>> {
        let endpoint = format!("{}/_search", self.index);
        let request = self
            .request(Method::POST, &endpoint)
            .query(&[
                ("scroll", SCROLL_KEEP_ALIVE.to_string()),
                ("size", SCROLL_PAGE_SIZE.to_string()),
                ("sort", "_doc".to_string()),
                ("_source", self.id_path.clone()),
            ])
            .json(&query);
        let mut page: SearchResponse = self.send(request, &endpoint).await?;

        let mut ids: Vec<String> = Vec::new();
        let mut pages = 1usize;
        loop {
            if page.hits.hits.is_empty() {
                break;
            }
            ids.extend(page.hits.hits.into_iter().map(|hit| hit.id));

            let Some(scroll_id) = page.scroll_id.clone() else {
                break;
            };
            let request = self.request(Method::POST, "_search/scroll").json(&json!({
                "scroll": SCROLL_KEEP_ALIVE,
                "scroll_id": scroll_id,
            }));
            page = self.send(request, "_search/scroll").await?;
            pages += 1;
        }

        if let Some(scroll_id) = page.scroll_id {
            self.clear_scroll(&scroll_id).await;
        }

        debug!("{}: scrolled {} ids over {} pages", self.index, ids.len(), pages);
        ids.sort();
        Ok(ids)
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let request = self
            .request(Method::DELETE, "_search/scroll")
            .json(&json!({ "scroll_id": [scroll_id] }));
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => debug!("clearing scroll returned status {}", resp.status()),
            Err(e) => warn!("Failed to clear scroll context: {}", e),
        }
    }

    /// Confirm the cluster is reachable and the index exists.
    pub async fn ping(&self) -> Result<()> {
        let count = self.count_index().await?;
        info!(
            "Connected to Elasticsearch {} (index {}, {} documents)",
            self.base_url, self.index, count
        );
        Ok(())
    }
}

fn ids_query(ids: &[String]) -> serde_json::Value {
    json!({ "query": { "bool": { "filter": { "ids": { "values": ids } } } } })
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl IndexClient for EsIndexClient {
    async fn count_index(&self) -> Result<u64> {
        let endpoint = format!("{}/_count", self.index);
        let resp: CountResponse = self
            .send(self.request(Method::GET, &endpoint), &endpoint)
            .await?;
        debug!("{}: count = {}", self.index, resp.count);
        Ok(resp.count)
    }

    async fn ids_by_modified_on(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut range = serde_json::Map::new();
        range.insert(
            self.modified_on_path.clone(),
            json!({ "gte": format_ts(start), "lt": format_ts(end) }),
        );
        self.scroll_ids(json!({ "query": { "range": range } })).await
    }

    async fn ids_by_id_list(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(ID_LIST_CHUNK_SIZE) {
            found.extend(self.scroll_ids(ids_query(chunk)).await?);
        }
        found.sort();
        Ok(found)
    }

    async fn documents_by_ids(&self, ids: &[String]) -> Result<Vec<RawRecord>> {
        let endpoint = format!("{}/_search", self.index);
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_LIST_CHUNK_SIZE) {
            let request = self
                .request(Method::POST, &endpoint)
                .query(&[("size", chunk.len().to_string()), ("sort", "_id".to_string())])
                .json(&ids_query(chunk));
            let resp: SearchResponse = self.send(request, &endpoint).await?;
            records.extend(resp.hits.hits.into_iter().map(|hit| {
                let body = hit.source.map(Value::from).unwrap_or(Value::Null);
                RawRecord::new(hit.id, body)
            }));
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
