use chrono::Utc;
use obsgate_contract::CanonicalLogRow;

use crate::deadletter::{DeadLetterRecord, DeadLetterSink};
use crate::jobstate::JobStateTracker;
use crate::mapping::mapping_for;
use crate::source::RawSourceRow;

pub const DEFAULT_ERROR_THRESHOLD_PCT: f64 = 5.0;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// The normalizer yields cooperative scheduling points every `B` rows
/// (`spec.md` §5), default 1000.
pub const YIELD_EVERY_ROWS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct NormalizeRunReport {
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_dead_lettered: u64,
    pub aborted: bool,
}

/// Normalizes one unit of work: a batch of raw rows from a single
/// `(source_table, window)`. A row that fails normalization goes to the
/// dead-letter sink and the batch continues; once the failure rate exceeds
/// `error_threshold_pct` the batch aborts (`spec.md` §4.4 Failure policy).
pub fn normalize_batch(
    rows: &[RawSourceRow],
    dead_letters: &mut dyn DeadLetterSink,
    error_threshold_pct: f64,
) -> (Vec<CanonicalLogRow>, NormalizeRunReport) {
    let mut out = Vec::with_capacity(rows.len());
    let mut report = NormalizeRunReport {
        rows_in: rows.len() as u64,
        ..Default::default()
    };

    for (idx, raw) in rows.iter().enumerate() {
        let mapping = mapping_for(raw.table);
        match mapping.normalize(raw) {
            Ok(row) => match row.check_invariants() {
                Ok(()) => {
                    report.rows_out += 1;
                    out.push(row);
                }
                Err(err) => {
                    report.rows_dead_lettered += 1;
                    dead_letters.record(DeadLetterRecord {
                        source_table: raw.table,
                        window_start: Utc::now(),
                        window_end: Utc::now(),
                        raw_payload: raw.payload.clone(),
                        reason: err.to_string(),
                        failed_ts: Utc::now(),
                    });
                }
            },
            Err(err) => {
                report.rows_dead_lettered += 1;
                dead_letters.record(DeadLetterRecord {
                    source_table: raw.table,
                    window_start: Utc::now(),
                    window_end: Utc::now(),
                    raw_payload: raw.payload.clone(),
                    reason: err.to_string(),
                    failed_ts: Utc::now(),
                });
            }
        }

        let processed = idx + 1;
        let failure_pct = (report.rows_dead_lettered as f64 / processed as f64) * 100.0;
        if failure_pct > error_threshold_pct {
            report.aborted = true;
            break;
        }
    }

    (out, report)
}

/// Runs a full unit of work end to end: claim the window, normalize, commit
/// or fail the job state. `sink` receives the successfully normalized rows;
/// callers own durable persistence (the canonical fact table lives in
/// C9's storage engine in this system, per SPEC_FULL.md §4.9a).
pub fn run_unit_of_work(
    tracker: &mut JobStateTracker,
    table: crate::source::SourceTableKind,
    window_start: chrono::DateTime<Utc>,
    window_end: chrono::DateTime<Utc>,
    rows: &[RawSourceRow],
    dead_letters: &mut dyn DeadLetterSink,
    sink: &mut dyn FnMut(&[CanonicalLogRow]),
    error_threshold_pct: f64,
) -> Result<NormalizeRunReport, crate::jobstate::ClaimError> {
    tracker.claim(table, window_start, window_end, Utc::now())?;

    let (normalized, report) = normalize_batch(rows, dead_letters, error_threshold_pct);
    sink(&normalized);

    let now = Utc::now();
    if report.aborted {
        tracker.mark_failed(table, window_start, window_end, report.rows_in, report.rows_out, now);
    } else {
        tracker.mark_done(table, window_start, window_end, report.rows_in, report.rows_out, now);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceTableKind;
    use chrono::Duration;
    use serde_json::json;

    fn good_row(n: usize) -> RawSourceRow {
        RawSourceRow {
            table: SourceTableKind::GenericJsonLog,
            native_id: Some(format!("id-{n}")),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            payload: json!({"service_name": "svc", "message": format!("row {n}")}),
        }
    }

    fn bad_row(n: usize) -> RawSourceRow {
        RawSourceRow {
            table: SourceTableKind::GenericJsonLog,
            native_id: Some(format!("bad-{n}")),
            timestamp: "not-a-timestamp".to_string(),
            payload: json!({"service_name": "svc"}),
        }
    }

    #[test]
    fn all_good_rows_normalize_with_no_dead_letters() {
        let rows: Vec<_> = (0..50).map(good_row).collect();
        let mut sink = crate::deadletter::InMemoryDeadLetterSink::default();
        let (out, report) = normalize_batch(&rows, &mut sink, DEFAULT_ERROR_THRESHOLD_PCT);
        assert_eq!(out.len(), 50);
        assert_eq!(report.rows_dead_lettered, 0);
        assert!(!report.aborted);
    }

    #[test]
    fn bad_rows_go_to_dead_letter_and_batch_continues_under_threshold() {
        let mut rows: Vec<_> = (0..40).map(good_row).collect();
        rows.push(bad_row(0));
        let mut sink = crate::deadletter::InMemoryDeadLetterSink::default();
        let (out, report) = normalize_batch(&rows, &mut sink, DEFAULT_ERROR_THRESHOLD_PCT);
        assert_eq!(out.len(), 40);
        assert_eq!(report.rows_dead_lettered, 1);
        assert_eq!(sink.records.len(), 1);
        assert!(!report.aborted);
    }

    #[test]
    fn batch_aborts_once_error_rate_exceeds_threshold() {
        let mut rows: Vec<_> = (0..20).map(good_row).collect();
        rows.extend((0..5).map(bad_row));
        let mut sink = crate::deadletter::InMemoryDeadLetterSink::default();
        let (_out, report) = normalize_batch(&rows, &mut sink, DEFAULT_ERROR_THRESHOLD_PCT);
        assert!(report.aborted);
    }

    #[test]
    fn replaying_the_same_window_is_net_zero() {
        let mut tracker = JobStateTracker::new();
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let rows: Vec<_> = (0..100).map(good_row).collect();
        let mut dead_letters = crate::deadletter::InMemoryDeadLetterSink::default();
        let mut collected = Vec::new();

        let report1 = run_unit_of_work(
            &mut tracker,
            SourceTableKind::GenericJsonLog,
            start,
            end,
            &rows,
            &mut dead_letters,
            &mut |batch| collected.extend_from_slice(batch),
            DEFAULT_ERROR_THRESHOLD_PCT,
        )
        .unwrap();
        assert_eq!(report1.rows_out, 100);

        // Re-running the same window should be a no-op: it's already `done`.
        let err = tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap_err();
        assert_eq!(err, crate::jobstate::ClaimError::AlreadyDone);

        let distinct_ids: std::collections::HashSet<_> =
            collected.iter().map(|r| r.log_id.clone()).collect();
        assert_eq!(distinct_ids.len(), 100);
    }
}
