//! Result types for the reconciliation phases.

use crate::error::{ReconcileError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Lower bound of the ID window when validating everything: one day after the
/// epoch, so zero-valued timestamps never match.
pub fn far_past_floor() -> DateTime<Utc> {
    Utc.timestamp_opt(86_400, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parameters of one validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub period_minutes: i64,
    pub lag_compensation_seconds: i64,
    pub validate_everything: bool,
    pub invalid_threshold_percent: u32,
    /// Anchor instant for the ID window.
    pub now: DateTime<Utc>,
    pub content_chunk_size: usize,
    pub content_workers: usize,
    pub preview_limit: usize,
}

impl RunConfig {
    /// Defaults anchored at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            period_minutes: 60,
            lag_compensation_seconds: 0,
            validate_everything: false,
            invalid_threshold_percent: 5,
            now,
            content_chunk_size: 100,
            content_workers: 10,
            preview_limit: 50,
        }
    }

    /// The half-open `[start, end)` window of the ID phase.
    ///
    /// Fails when the period or lag reaches outside the representable range.
    pub fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let end = Duration::try_seconds(self.lag_compensation_seconds)
            .and_then(|lag| self.now.checked_sub_signed(lag))
            .ok_or_else(|| {
                ReconcileError::Config(format!(
                    "lag_compensation_seconds {} is out of range",
                    self.lag_compensation_seconds
                ))
            })?;
        let start = if self.validate_everything {
            far_past_floor()
        } else {
            Duration::try_minutes(self.period_minutes)
                .and_then(|period| self.now.checked_sub_signed(period))
                .ok_or_else(|| {
                    ReconcileError::Config(format!(
                        "period_minutes {} is out of range",
                        self.period_minutes
                    ))
                })?
        };
        Ok((start, end))
    }
}

/// Outcome of the count phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResult {
    pub db_count: u64,
    pub index_count: u64,
    pub mismatch_count: u64,
    pub mismatch_ratio: f64,
    pub is_valid: bool,
}

/// Outcome of the ID phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdsResult {
    pub in_db_only: Vec<String>,
    pub in_index_only: Vec<String>,
    pub total_db_retrieved: usize,
    pub total_index_retrieved: usize,
    pub mismatch_count: usize,
    pub mismatch_ratio: f64,
    pub is_valid: bool,

    /// Windowed database IDs, consumed by the content phase.
    #[serde(skip)]
    pub candidate_ids: Vec<String>,
}

/// Differences found for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDiff {
    /// Normalized database record as JSON, empty when the row is absent.
    pub db_record_snapshot: String,

    /// Normalized index document as JSON, empty when the document is absent.
    pub index_record_snapshot: String,

    /// `path: db != index` entries in traversal order.
    pub diffs: Vec<String>,
}

/// Outcome of the content phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResult {
    pub mismatch_count: usize,
    pub total_validated: usize,
    pub mismatch_ratio: f64,
    pub is_valid: bool,
    pub mismatched_ids: Vec<String>,

    /// The first `preview_limit` mismatched records in ascending ID order.
    pub mismatched_records: BTreeMap<String, ContentDiff>,
}

impl ContentResult {
    /// Result for an empty candidate set.
    pub fn empty() -> Self {
        Self {
            mismatch_count: 0,
            total_validated: 0,
            mismatch_ratio: 0.0,
            is_valid: true,
            mismatched_ids: Vec::new(),
            mismatched_records: BTreeMap::new(),
        }
    }
}

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Valid,
    Invalid,
}

/// Phase that made a run invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reason {
    #[serde(rename = "count mismatch")]
    CountMismatch,
    #[serde(rename = "id mismatch")]
    IdMismatch,
    #[serde(rename = "content mismatch")]
    ContentMismatch,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Reason::CountMismatch => "count mismatch",
            Reason::IdMismatch => "id mismatch",
            Reason::ContentMismatch => "content mismatch",
        };
        f.write_str(s)
    }
}

/// One previewed content mismatch in the report details.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchContentDetail {
    pub id: String,
    pub db_content: String,
    pub index_content: String,
    pub diffs: Vec<String>,
}

/// Summary block of a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetails {
    pub total_mismatch: u64,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids_missing_from_index: Vec<String>,

    #[serde(skip_serializing_if = "is_zero")]
    pub ids_missing_from_index_count: usize,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids_only_in_index: Vec<String>,

    #[serde(skip_serializing_if = "is_zero")]
    pub ids_only_in_index_count: usize,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids_with_mismatch_content: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatch_content_details: Vec<MismatchContentDetail>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Final report of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub result: Verdict,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<CountResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<IdsResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentResult>,

    pub details: ReportDetails,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.result == Verdict::Valid
    }
}
