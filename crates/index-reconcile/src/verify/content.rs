//! Content phase: compare full normalized records.
//!
//! Candidate IDs are split into chunks diffed on a semaphore-bounded pool of
//! tokio tasks. Mismatched IDs are then diffed again in one pass to rule out
//! records that were still in flight through the pipeline.

use super::diff::Differ;
use super::types::{ContentDiff, ContentResult, RunConfig};
use super::Validator;
use crate::error::{ReconcileError, Result};
use crate::index::IndexClient;
use crate::record::{NormalizedRecord, RecordNormalizer};
use crate::source::DataSourceClient;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Diff entries kept per ID.
pub const DIFFS_PER_RECORD: usize = 100;

/// Mismatched records keyed by ID.
pub type MismatchedRecords = BTreeMap<String, ContentDiff>;

/// Everything a chunk worker needs, cheap to clone into a task.
#[derive(Clone)]
struct ChunkDiffer {
    db: Arc<dyn DataSourceClient>,
    index: Arc<dyn IndexClient>,
    normalizer: RecordNormalizer,
}

impl ChunkDiffer {
    /// Fetch, normalize and diff exactly the records of `ids`.
    async fn diff(&self, ids: &[String]) -> Result<MismatchedRecords> {
        let (rows, docs) = tokio::try_join!(
            self.db.rows_by_ids(ids),
            self.index.documents_by_ids(ids)
        )?;

        let db_records = by_id(self.normalizer.normalize_all(&rows)?);
        let index_records = by_id(self.normalizer.normalize_all(&docs)?);
        let root = self.normalizer.schema().root_node.clone();

        let mut mismatched = MismatchedRecords::new();
        for id in ids {
            let db = db_records.get(id);
            let index = index_records.get(id);
            // Each ID gets its own budget so a noisy record cannot hide others.
            let mut differ = Differ::new(DIFFS_PER_RECORD);
            let diffs = match (db, index) {
                (Some(a), Some(b)) => differ.diff("", &a.value, &b.value),
                (None, None) => continue,
                (a, b) => differ.missing(&root, a.map(|r| &r.value), b.map(|r| &r.value)),
            };
            if diffs.is_empty() {
                continue;
            }
            if differ.is_full() {
                debug!("{}: diff limit of {} entries reached", id, DIFFS_PER_RECORD);
            }
            // Snapshots are taken once, on the first occurrence of an ID.
            mismatched
                .entry(id.clone())
                .or_insert_with(|| ContentDiff {
                    db_record_snapshot: snapshot(db),
                    index_record_snapshot: snapshot(index),
                    diffs: Vec::new(),
                })
                .diffs
                .extend(diffs);
        }
        Ok(mismatched)
    }
}

fn by_id(records: Vec<NormalizedRecord>) -> BTreeMap<String, NormalizedRecord> {
    records.into_iter().map(|r| (r.id.clone(), r)).collect()
}

fn snapshot(record: Option<&NormalizedRecord>) -> String {
    record.map(|r| r.value.to_json_string()).unwrap_or_default()
}

impl Validator {
    fn chunk_differ(&self) -> ChunkDiffer {
        ChunkDiffer {
            db: self.db.clone(),
            index: self.index.clone(),
            normalizer: self.normalizer.clone(),
        }
    }

    /// Compare the content of every candidate record.
    pub async fn reconcile_content(
        &self,
        candidates: &[String],
        run: &RunConfig,
    ) -> Result<ContentResult> {
        if candidates.is_empty() {
            info!("Content phase: no candidate ids");
            return Ok(ContentResult::empty());
        }
        info!(
            "Content phase: {} candidate ids in chunks of {} ({} workers)",
            candidates.len(),
            run.content_chunk_size,
            run.content_workers
        );

        let first_pass = self.diff_in_parallel(candidates, run).await?;

        let confirmed = if first_pass.is_empty() {
            first_pass
        } else {
            let suspects: Vec<String> = first_pass.into_keys().collect();
            info!(
                "Content phase: {} mismatched records, re-checking",
                suspects.len()
            );
            self.chunk_differ().diff(&suspects).await?
        };

        let mismatch_count = confirmed.len();
        let mismatch_ratio = mismatch_count as f64 / candidates.len().max(1) as f64;
        let is_valid = mismatch_ratio * 100.0 <= run.invalid_threshold_percent as f64;
        let mismatched_ids: Vec<String> = confirmed.keys().cloned().collect();
        let mismatched_records: MismatchedRecords =
            confirmed.into_iter().take(run.preview_limit).collect();

        info!(
            "Content phase: {} of {} records mismatched, ratio {:.4} ({})",
            mismatch_count,
            candidates.len(),
            mismatch_ratio,
            if is_valid { "valid" } else { "invalid" }
        );

        Ok(ContentResult {
            mismatch_count,
            total_validated: candidates.len(),
            mismatch_ratio,
            is_valid,
            mismatched_ids,
            mismatched_records,
        })
    }

    /// Diff all chunks on the worker pool and merge their results.
    ///
    /// Once any worker fails no further chunk is dispatched; every dispatched
    /// worker is still awaited before the failure is returned.
    async fn diff_in_parallel(
        &self,
        candidates: &[String],
        run: &RunConfig,
    ) -> Result<MismatchedRecords> {
        let chunk_size = run.content_chunk_size.max(1);
        let semaphore = Arc::new(Semaphore::new(run.content_workers.max(1)));
        let failed = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<MismatchedRecords>)>();
        let mut handles = Vec::new();

        for (n, chunk) in candidates.chunks(chunk_size).enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ReconcileError::query("content workers", e.to_string()))?;
            if failed.load(Ordering::SeqCst) {
                warn!("Content phase: worker failed, not dispatching remaining chunks");
                break;
            }

            let differ = self.chunk_differ();
            let chunk = chunk.to_vec();
            let tx = tx.clone();
            let failed = failed.clone();
            debug!("Dispatching content chunk {} ({} ids)", n, chunk.len());

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = differ.diff(&chunk).await;
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                let _ = tx.send((n, result));
            }));
        }
        drop(tx);

        let dispatched = handles.len();
        let mut merged = MismatchedRecords::new();
        let mut failures = 0usize;
        let mut last_error = None;

        while let Some((n, result)) = rx.recv().await {
            match result {
                Ok(diffs) => {
                    for (id, diff) in diffs {
                        merged.entry(id).or_insert(diff);
                    }
                }
                Err(e) => {
                    error!("Content chunk {} failed: {}", n, e);
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Content worker panicked: {}", e);
                failures += 1;
                last_error = Some(ReconcileError::query("content worker", e.to_string()));
            }
        }

        match last_error {
            Some(last) => Err(ReconcileError::Workers {
                failed: failures,
                dispatched,
                last: Box::new(last),
            }),
            None => Ok(merged),
        }
    }
}
