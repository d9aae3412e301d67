//! ID phase: compare ID-set membership over a time window.
//!
//! The windowed pass can report false mismatches when a record is modified
//! between the two reads. Any mismatched IDs are therefore re-queried by
//! explicit ID list on both sides, without a window, and that second pass
//! decides the result.

use super::types::{IdsResult, RunConfig};
use super::Validator;
use crate::error::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Sorted set differences `(left - right, right - left)`.
pub fn set_differences(left: &[String], right: &[String]) -> (Vec<String>, Vec<String>) {
    let l: BTreeSet<&String> = left.iter().collect();
    let r: BTreeSet<&String> = right.iter().collect();
    (
        l.difference(&r).map(|s| s.to_string()).collect(),
        r.difference(&l).map(|s| s.to_string()).collect(),
    )
}

impl Validator {
    /// Compare the IDs modified within the run's window.
    ///
    /// `db_count` is the total from the count phase and sizes the ratio.
    pub async fn reconcile_ids(&self, run: &RunConfig, db_count: u64) -> Result<IdsResult> {
        let (start, end) = run.window()?;
        debug!("ID phase window: [{}, {})", start, end);

        let db_ids = self.db.ids_by_modified_on(start, end).await?;
        let index_ids = self.index.ids_by_modified_on(start, end).await?;
        let (mut in_db_only, mut in_index_only) = set_differences(&db_ids, &index_ids);

        if !in_db_only.is_empty() || !in_index_only.is_empty() {
            let suspects: Vec<String> = in_db_only
                .iter()
                .chain(in_index_only.iter())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            info!(
                "ID phase: {} mismatched ids in window, re-checking by id",
                suspects.len()
            );
            let db_confirmed = self.db.ids_by_id_list(&suspects).await?;
            let index_confirmed = self.index.ids_by_id_list(&suspects).await?;
            (in_db_only, in_index_only) = set_differences(&db_confirmed, &index_confirmed);
        }

        let mismatch_count = in_db_only.len() + in_index_only.len();
        let denominator = (db_count as usize + in_index_only.len()).max(1) as f64;
        let result = IdsResult {
            mismatch_ratio: mismatch_count as f64 / denominator,
            is_valid: mismatch_count == 0,
            mismatch_count,
            in_db_only,
            in_index_only,
            total_db_retrieved: db_ids.len(),
            total_index_retrieved: index_ids.len(),
            candidate_ids: db_ids,
        };

        info!(
            "ID phase: {} db ids, {} index ids, {} mismatched ({})",
            result.total_db_retrieved,
            result.total_index_retrieved,
            result.mismatch_count,
            if result.is_valid { "valid" } else { "invalid" }
        );
        Ok(result)
    }
}
