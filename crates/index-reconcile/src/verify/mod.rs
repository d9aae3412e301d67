//! Three-phase reconciliation of a source table against its search index.
//!
//! - **Count**: compare total rows with total documents
//! - **IDs**: compare the IDs modified within a recent window, re-checking
//!   mismatches by explicit ID list
//! - **Content**: diff the normalized records of the windowed IDs on a
//!   bounded worker pool, re-checking mismatched records once
//!
//! Phases run in that order and a run stops at the first invalid phase.

mod content;
mod count;
mod diff;
mod ids;
mod types;

pub use content::{MismatchedRecords, DIFFS_PER_RECORD};
pub use count::{compare_counts, COUNT_RATIO_TOLERANCE};
pub use diff::Differ;
pub use ids::set_differences;
pub use types::{
    far_past_floor, ContentDiff, ContentResult, CountResult, IdsResult, MismatchContentDetail,
    Reason, ReportDetails, RunConfig, ValidationReport, Verdict,
};

use crate::error::Result;
use crate::index::IndexClient;
use crate::record::{LagSink, RecordNormalizer};
use crate::schema::ParsedSchema;
use crate::source::DataSourceClient;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Runs reconciliation phases against a pair of stores.
#[derive(Clone)]
pub struct Validator {
    pub(crate) db: Arc<dyn DataSourceClient>,
    pub(crate) index: Arc<dyn IndexClient>,
    pub(crate) normalizer: RecordNormalizer,
}

impl Validator {
    pub fn new(
        db: Arc<dyn DataSourceClient>,
        index: Arc<dyn IndexClient>,
        schema: Arc<ParsedSchema>,
        lag_sink: Arc<dyn LagSink>,
    ) -> Self {
        Self {
            db,
            index,
            normalizer: RecordNormalizer::new(schema, lag_sink),
        }
    }

    /// Run all phases and assemble the report.
    ///
    /// Divergence between the stores yields an invalid report; only failures
    /// to read or normalize records are errors.
    pub async fn validate(&self, run: &RunConfig) -> Result<ValidationReport> {
        let start = Instant::now();
        info!(
            "Starting validation (period {}m, lag compensation {}s, everything: {})",
            run.period_minutes, run.lag_compensation_seconds, run.validate_everything
        );

        let count = self.reconcile_count().await?;
        if !count.is_valid {
            return Ok(count_report(count));
        }

        let ids = self.reconcile_ids(run, count.db_count).await?;
        if !ids.is_valid {
            return Ok(ids_report(count, ids, run.preview_limit));
        }

        let content = self.reconcile_content(&ids.candidate_ids, run).await?;
        let report = if content.is_valid {
            valid_report(count, ids, content)
        } else {
            content_report(count, ids, content, run.preview_limit)
        };

        info!(
            "Validation finished in {:.2}s: {}",
            start.elapsed().as_secs_f64(),
            report.message
        );
        Ok(report)
    }
}

fn count_report(count: CountResult) -> ValidationReport {
    let message = format!(
        "{} discrepancies while counting. {} documents in index. {} rows in database.",
        count.mismatch_count, count.index_count, count.db_count
    );
    info!("Validation invalid: {}", message);
    ValidationReport {
        result: Verdict::Invalid,
        reason: Some(Reason::CountMismatch),
        message,
        details: ReportDetails {
            total_mismatch: count.mismatch_count,
            ..Default::default()
        },
        count: Some(count),
        ids: None,
        content: None,
    }
}

fn ids_report(count: CountResult, ids: IdsResult, preview_limit: usize) -> ValidationReport {
    let message = format!("{} ids did not match.", ids.mismatch_count);
    info!("Validation invalid: {}", message);
    ValidationReport {
        result: Verdict::Invalid,
        reason: Some(Reason::IdMismatch),
        message,
        details: ReportDetails {
            total_mismatch: ids.mismatch_count as u64,
            ids_missing_from_index: preview(&ids.in_db_only, preview_limit),
            ids_missing_from_index_count: ids.in_db_only.len(),
            ids_only_in_index: preview(&ids.in_index_only, preview_limit),
            ids_only_in_index_count: ids.in_index_only.len(),
            ..Default::default()
        },
        count: Some(count),
        ids: Some(ids),
        content: None,
    }
}

fn content_report(
    count: CountResult,
    ids: IdsResult,
    content: ContentResult,
    preview_limit: usize,
) -> ValidationReport {
    let message = format!(
        "{} records' contents did not match.",
        content.mismatch_count
    );
    info!("Validation invalid: {}", message);
    ValidationReport {
        result: Verdict::Invalid,
        reason: Some(Reason::ContentMismatch),
        message,
        details: content_details(&content, preview_limit),
        count: Some(count),
        ids: Some(ids),
        content: Some(content),
    }
}

fn valid_report(count: CountResult, ids: IdsResult, content: ContentResult) -> ValidationReport {
    let message = format!(
        "Index is valid. {} records validated, {} contents did not match.",
        content.total_validated, content.mismatch_count
    );
    ValidationReport {
        result: Verdict::Valid,
        reason: None,
        message,
        details: ReportDetails {
            total_mismatch: content.mismatch_count as u64,
            ..Default::default()
        },
        count: Some(count),
        ids: Some(ids),
        content: Some(content),
    }
}

fn content_details(content: &ContentResult, preview_limit: usize) -> ReportDetails {
    let mismatch_content_details = content
        .mismatched_records
        .iter()
        .map(|(id, diff)| MismatchContentDetail {
            id: id.clone(),
            db_content: diff.db_record_snapshot.clone(),
            index_content: diff.index_record_snapshot.clone(),
            diffs: diff.diffs.clone(),
        })
        .collect();
    ReportDetails {
        total_mismatch: content.mismatch_count as u64,
        ids_with_mismatch_content: preview(&content.mismatched_ids, preview_limit),
        mismatch_content_details,
        ..Default::default()
    }
}

fn preview(ids: &[String], limit: usize) -> Vec<String> {
    ids.iter().take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use crate::record::NoopLagSink;
    use crate::testing::{hosts_schema, Host, MemoryStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn recent() -> DateTime<Utc> {
        now() - Duration::minutes(10)
    }

    fn validator(db: &Arc<MemoryStore>, index: &Arc<MemoryStore>) -> Validator {
        Validator::new(
            db.clone(),
            index.clone(),
            Arc::new(hosts_schema()),
            Arc::new(NoopLagSink),
        )
    }

    fn stores(db: Vec<Host>, index: Vec<Host>) -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::with_hosts(db)),
            Arc::new(MemoryStore::with_hosts(index)),
        )
    }

    fn with_profile(id: &str) -> Host {
        let mut host = Host::new(id, recent());
        host.facts = json!({"system_profile": {"arch": "x86_64", "cores": 4}});
        host
    }

    #[tokio::test]
    async fn test_count_scenario_equal() {
        let (db, index) = stores(vec![Host::new("1", recent())], vec![Host::new("1", recent())]);
        let count = validator(&db, &index).reconcile_count().await.unwrap();
        assert!(count.is_valid);
        assert_eq!(count.mismatch_count, 0);
        assert_eq!(count.mismatch_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_count_tolerance_through_validate() {
        let hosts: Vec<Host> = (0..3).map(|i| Host::new(&i.to_string(), recent())).collect();
        let (db, index) = stores(hosts.clone(), hosts);
        db.set_count(100);
        index.set_count(80);

        let report = validator(&db, &index)
            .validate(&RunConfig::new(now()))
            .await
            .unwrap();
        assert!(report.is_valid());
        assert_eq!(report.count.as_ref().unwrap().mismatch_ratio, 0.2);

        index.set_count(79);
        let report = validator(&db, &index)
            .validate(&RunConfig::new(now()))
            .await
            .unwrap();
        assert_eq!(report.reason, Some(Reason::CountMismatch));
        assert_eq!(report.details.total_mismatch, 21);
    }

    #[tokio::test]
    async fn test_empty_index_short_circuits_on_count() {
        let hosts: Vec<Host> = (0..10).map(|i| Host::new(&i.to_string(), recent())).collect();
        let (db, index) = stores(hosts, vec![]);

        let report = validator(&db, &index)
            .validate(&RunConfig::new(now()))
            .await
            .unwrap();
        assert_eq!(report.result, Verdict::Invalid);
        assert_eq!(report.reason, Some(Reason::CountMismatch));
        assert_eq!(
            report.message,
            "10 discrepancies while counting. 0 documents in index. 10 rows in database."
        );
        let count = report.count.unwrap();
        assert_eq!(count.mismatch_ratio, 1.0);
        assert!(report.ids.is_none());
        assert!(report.content.is_none());
        assert_eq!(db.row_calls(), 0);
    }

    #[tokio::test]
    async fn test_id_mismatch_confirmed_on_both_sides() {
        let (db, index) = stores(
            vec![Host::new("5678", recent())],
            vec![Host::new("1234", recent())],
        );

        let report = validator(&db, &index)
            .validate(&RunConfig::new(now()))
            .await
            .unwrap();
        assert_eq!(report.reason, Some(Reason::IdMismatch));
        assert_eq!(report.message, "2 ids did not match.");

        let ids = report.ids.unwrap();
        assert_eq!(ids.in_db_only, vec!["5678"]);
        assert_eq!(ids.in_index_only, vec!["1234"]);
        assert_eq!(ids.mismatch_count, 2);
        assert!(!ids.is_valid);
        assert_eq!(report.details.ids_missing_from_index, vec!["5678"]);
        assert_eq!(report.details.ids_only_in_index_count, 1);
        assert!(report.content.is_none());
    }

    #[tokio::test]
    async fn test_id_mismatch_is_symmetric() {
        let a = vec![Host::new("1", recent()), Host::new("2", recent())];
        let b = vec![Host::new("2", recent()), Host::new("3", recent())];
        let run = RunConfig::new(now());

        let (db, index) = stores(a.clone(), b.clone());
        let forward = validator(&db, &index).reconcile_ids(&run, 2).await.unwrap();
        let (db, index) = stores(b, a);
        let backward = validator(&db, &index).reconcile_ids(&run, 2).await.unwrap();

        assert_eq!(forward.mismatch_count, backward.mismatch_count);
        assert_eq!(forward.in_db_only, backward.in_index_only);
        assert_eq!(forward.in_index_only, backward.in_db_only);
    }

    #[tokio::test]
    async fn test_id_lag_recheck_clears_in_flight_records() {
        let (db, index) = stores(
            vec![Host::new("1", recent()), Host::new("2", recent())],
            vec![Host::new("1", recent())],
        );
        index.put_pending(Host::new("2", recent()));

        let ids = validator(&db, &index)
            .reconcile_ids(&RunConfig::new(now()), 2)
            .await
            .unwrap();
        assert!(ids.is_valid);
        assert_eq!(ids.mismatch_count, 0);
        assert_eq!(ids.total_index_retrieved, 1);
        assert_eq!(ids.candidate_ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_window_excludes_lagging_records() {
        let mut run = RunConfig::new(now());
        run.lag_compensation_seconds = 15 * 60;
        let (db, index) = stores(vec![Host::new("1", recent())], vec![]);

        let ids = validator(&db, &index).reconcile_ids(&run, 1).await.unwrap();
        assert_eq!(ids.total_db_retrieved, 0);
        assert!(ids.is_valid);
    }

    #[tokio::test]
    async fn test_content_display_name_difference() {
        let mut changed = Host::new("1", recent());
        changed.display_name = "B".into();
        let mut original = Host::new("1", recent());
        original.display_name = "A".into();
        let (db, index) = stores(vec![original], vec![changed]);
        let mut run = RunConfig::new(now());
        run.invalid_threshold_percent = 0;

        let report = validator(&db, &index).validate(&run).await.unwrap();
        assert_eq!(report.reason, Some(Reason::ContentMismatch));
        assert_eq!(report.message, "1 records' contents did not match.");

        let content = report.content.unwrap();
        assert_eq!(content.mismatch_count, 1);
        assert_eq!(content.mismatch_ratio, 1.0);
        assert_eq!(
            content.mismatched_records["1"].diffs,
            vec!["host.display_name: A != B"]
        );
        assert_eq!(report.details.mismatch_content_details.len(), 1);
        assert!(report.details.mismatch_content_details[0]
            .db_content
            .contains("\"display_name\":\"A\""));
    }

    #[tokio::test]
    async fn test_content_missing_sub_object_counts_leaves() {
        let (db, index) = stores(
            vec![with_profile("1"), with_profile("2"), Host::new("3", recent())],
            vec![
                Host::new("1", recent()),
                Host::new("2", recent()),
                Host::new("3", recent()),
            ],
        );
        let ids: Vec<String> = vec!["1".into(), "2".into(), "3".into()];

        let content = validator(&db, &index)
            .reconcile_content(&ids, &RunConfig::new(now()))
            .await
            .unwrap();
        assert_eq!(content.mismatch_count, 2);
        assert_eq!(content.mismatched_ids, vec!["1", "2"]);
        assert!(!content.is_valid);
        for diff in content.mismatched_records.values() {
            assert_eq!(diff.diffs.len(), 2);
            assert_eq!(
                diff.diffs[0],
                "host.facts.system_profile.arch: x86_64 != <missing>"
            );
        }
    }

    #[tokio::test]
    async fn test_noisy_record_does_not_hide_later_mismatches() {
        let mut noisy = Host::new("a", recent());
        noisy.facts = serde_json::Value::Object(
            (0..250).map(|i| (format!("k{:03}", i), json!(1))).collect(),
        );
        let mut noisy_index = noisy.clone();
        noisy_index.facts = serde_json::Value::Object(
            (0..250).map(|i| (format!("k{:03}", i), json!(2))).collect(),
        );
        let mut renamed = Host::new("b", recent());
        renamed.display_name = "B".into();

        let (db, index) = stores(
            vec![noisy, Host::new("b", recent())],
            vec![noisy_index, renamed],
        );
        let mut run = RunConfig::new(now());
        run.content_chunk_size = 1;
        let ids: Vec<String> = vec!["a".into(), "b".into()];

        let content = validator(&db, &index)
            .reconcile_content(&ids, &run)
            .await
            .unwrap();
        assert_eq!(content.mismatch_count, 2);
        assert_eq!(content.mismatched_ids, vec!["a", "b"]);
        assert_eq!(
            content.mismatched_records["a"].diffs.len(),
            DIFFS_PER_RECORD
        );
        assert_eq!(
            content.mismatched_records["b"].diffs,
            vec!["host.display_name: host-b != B"]
        );
    }

    #[tokio::test]
    async fn test_content_is_idempotent() {
        let (db, index) = stores(
            vec![with_profile("1"), Host::new("2", recent())],
            vec![Host::new("1", recent()), Host::new("2", recent())],
        );
        let v = validator(&db, &index);
        let ids: Vec<String> = vec!["1".into(), "2".into()];
        let run = RunConfig::new(now());

        let first = v.reconcile_content(&ids, &run).await.unwrap();
        let second = v.reconcile_content(&ids, &run).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let (db, index) = stores(vec![], vec![]);
        let content = validator(&db, &index)
            .reconcile_content(&[], &RunConfig::new(now()))
            .await
            .unwrap();
        assert_eq!(content.mismatch_count, 0);
        assert_eq!(content.mismatch_ratio, 0.0);
        assert!(content.is_valid);
    }

    #[tokio::test]
    async fn test_record_missing_from_one_side() {
        let (db, index) = stores(vec![Host::new("1", recent())], vec![]);
        let content = validator(&db, &index)
            .reconcile_content(&["1".to_string()], &RunConfig::new(now()))
            .await
            .unwrap();
        let diff = &content.mismatched_records["1"];
        assert_eq!(diff.diffs, vec!["host: <present> != <missing>"]);
        assert!(diff.index_record_snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_preview_keeps_lowest_ids() {
        let db_hosts: Vec<Host> = ["a", "b", "c"].iter().map(|id| with_profile(id)).collect();
        let index_hosts: Vec<Host> = ["a", "b", "c"]
            .iter()
            .map(|id| Host::new(id, recent()))
            .collect();
        let (db, index) = stores(db_hosts, index_hosts);
        let mut run = RunConfig::new(now());
        run.preview_limit = 2;
        run.content_chunk_size = 1;

        let report = validator(&db, &index).validate(&run).await.unwrap();
        let content = report.content.as_ref().unwrap();
        assert_eq!(content.mismatched_ids, vec!["a", "b", "c"]);
        assert_eq!(
            content.mismatched_records.keys().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(report.details.ids_with_mismatch_content, vec!["a", "b"]);
        assert_eq!(report.details.total_mismatch, 3);
    }

    #[tokio::test]
    async fn test_worker_failure_stops_dispatch() {
        let hosts: Vec<Host> = (0..3).map(|i| Host::new(&i.to_string(), recent())).collect();
        let (db, index) = stores(hosts.clone(), hosts);
        db.fail_rows_after(0);
        let mut run = RunConfig::new(now());
        run.content_chunk_size = 1;
        run.content_workers = 1;
        let ids: Vec<String> = vec!["0".into(), "1".into(), "2".into()];

        let err = validator(&db, &index)
            .reconcile_content(&ids, &run)
            .await
            .unwrap_err();
        match err {
            ReconcileError::Workers {
                failed, dispatched, ..
            } => {
                assert_eq!(failed, 1);
                assert_eq!(dispatched, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(db.row_calls(), 1);
    }

    #[tokio::test]
    async fn test_valid_run_has_all_blocks() {
        let hosts: Vec<Host> = (0..5).map(|i| Host::new(&i.to_string(), recent())).collect();
        let (db, index) = stores(hosts.clone(), hosts);
        let mut run = RunConfig::new(now());
        run.content_chunk_size = 2;

        let report = validator(&db, &index).validate(&run).await.unwrap();
        assert!(report.is_valid());
        assert!(report.reason.is_none());
        assert_eq!(report.content.as_ref().unwrap().total_validated, 5);
        assert!(report.count.is_some() && report.ids.is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"], "valid");
        assert!(json.get("reason").is_none());
        assert_eq!(json["ids"]["totalDbRetrieved"], 5);
    }
}
