//! Count phase: compare total rows against total documents.

use super::types::CountResult;
use super::Validator;
use crate::error::Result;
use tracing::info;

/// Largest mismatch ratio still considered valid.
pub const COUNT_RATIO_TOLERANCE: f64 = 0.20;

/// Compare two totals.
pub fn compare_counts(db_count: u64, index_count: u64) -> CountResult {
    let mismatch_count = db_count.abs_diff(index_count);
    let denominator = db_count.max(index_count).max(1) as f64;
    let mismatch_ratio = round2(mismatch_count as f64 / denominator);
    CountResult {
        db_count,
        index_count,
        mismatch_count,
        mismatch_ratio,
        is_valid: mismatch_ratio <= COUNT_RATIO_TOLERANCE,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl Validator {
    /// Count rows and documents and compare them.
    pub async fn reconcile_count(&self) -> Result<CountResult> {
        let db_count = self.db.count_table().await?;
        let index_count = self.index.count_index().await?;
        let result = compare_counts(db_count, index_count);
        info!(
            "Count phase: {} rows, {} documents, ratio {:.2} ({})",
            db_count,
            index_count,
            result.mismatch_ratio,
            if result.is_valid { "valid" } else { "invalid" }
        );
        Ok(result)
    }
}
