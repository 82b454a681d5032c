use chrono::{DateTime, Utc};

use crate::source::SourceTableKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunState {
    Running,
    Done,
    Failed,
}

/// `(source_table, window_start, window_end, rows_in, rows_out, state,
/// attempt, started_ts, finished_ts)` from `spec.md` §4.4. `running` acts as
/// the per-`(source_table, window)` lock (`spec.md` §5).
#[derive(Debug, Clone)]
pub struct JobState {
    pub source_table: SourceTableKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub rows_in: u64,
    pub rows_out: u64,
    pub state: JobRunState,
    pub attempt: u32,
    pub started_ts: DateTime<Utc>,
    pub finished_ts: Option<DateTime<Utc>>,
}

pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("window is already being processed")]
    AlreadyRunning,
    #[error("window already completed")]
    AlreadyDone,
    #[error("window failed after {MAX_ATTEMPTS} attempts, will not retry")]
    AttemptsExhausted,
}

/// In-process idempotent window tracker. A real deployment backs this with
/// the same durable store as the session store (C9); this type models the
/// claim/commit/fail state machine in isolation so it can be unit tested
/// without a database.
#[derive(Default)]
pub struct JobStateTracker {
    jobs: std::collections::HashMap<(SourceTableKind, i64, i64), JobState>,
}

impl JobStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(
        table: SourceTableKind,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> (SourceTableKind, i64, i64) {
        (table, window_start.timestamp(), window_end.timestamp())
    }

    /// Claims a window: unclaimed -> do it; done -> skip; failed -> retry
    /// with incremented attempt, capped at [`MAX_ATTEMPTS`]. Net-zero for
    /// repeated calls against the same window once it reaches a terminal
    /// state, per `spec.md` §4.4.
    pub fn claim(
        &mut self,
        table: SourceTableKind,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u32, ClaimError> {
        let key = Self::key(table, window_start, window_end);
        match self.jobs.get(&key) {
            None => {
                self.jobs.insert(
                    key,
                    JobState {
                        source_table: table,
                        window_start,
                        window_end,
                        rows_in: 0,
                        rows_out: 0,
                        state: JobRunState::Running,
                        attempt: 1,
                        started_ts: now,
                        finished_ts: None,
                    },
                );
                Ok(1)
            }
            Some(existing) => match existing.state {
                JobRunState::Running => Err(ClaimError::AlreadyRunning),
                JobRunState::Done => Err(ClaimError::AlreadyDone),
                JobRunState::Failed => {
                    if existing.attempt >= MAX_ATTEMPTS {
                        Err(ClaimError::AttemptsExhausted)
                    } else {
                        let attempt = existing.attempt + 1;
                        self.jobs.entry(key).and_modify(|j| {
                            j.state = JobRunState::Running;
                            j.attempt = attempt;
                            j.started_ts = now;
                            j.finished_ts = None;
                        });
                        Ok(attempt)
                    }
                }
            },
        }
    }

    pub fn mark_done(
        &mut self,
        table: SourceTableKind,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        rows_in: u64,
        rows_out: u64,
        now: DateTime<Utc>,
    ) {
        let key = Self::key(table, window_start, window_end);
        if let Some(job) = self.jobs.get_mut(&key) {
            job.state = JobRunState::Done;
            job.rows_in = rows_in;
            job.rows_out = rows_out;
            job.finished_ts = Some(now);
        }
    }

    pub fn mark_failed(
        &mut self,
        table: SourceTableKind,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        rows_in: u64,
        rows_out: u64,
        now: DateTime<Utc>,
    ) {
        let key = Self::key(table, window_start, window_end);
        if let Some(job) = self.jobs.get_mut(&key) {
            job.state = JobRunState::Failed;
            job.rows_in = rows_in;
            job.rows_out = rows_out;
            job.finished_ts = Some(now);
        }
    }

    pub fn get(
        &self,
        table: SourceTableKind,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<&JobState> {
        self.jobs.get(&Self::key(table, window_start, window_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc::now();
        (start, start + Duration::hours(1))
    }

    #[test]
    fn unclaimed_window_can_be_claimed() {
        let mut tracker = JobStateTracker::new();
        let (start, end) = window();
        let attempt = tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap();
        assert_eq!(attempt, 1);
    }

    #[test]
    fn done_window_cannot_be_reclaimed() {
        let mut tracker = JobStateTracker::new();
        let (start, end) = window();
        tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap();
        tracker.mark_done(SourceTableKind::GenericJsonLog, start, end, 10, 10, Utc::now());
        let err = tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap_err();
        assert_eq!(err, ClaimError::AlreadyDone);
    }

    #[test]
    fn failed_window_retries_with_incremented_attempt() {
        let mut tracker = JobStateTracker::new();
        let (start, end) = window();
        tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap();
        tracker.mark_failed(SourceTableKind::GenericJsonLog, start, end, 10, 0, Utc::now());
        let attempt = tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap();
        assert_eq!(attempt, 2);
    }

    #[test]
    fn retries_are_capped_at_max_attempts() {
        let mut tracker = JobStateTracker::new();
        let (start, end) = window();
        for _ in 0..MAX_ATTEMPTS {
            tracker
                .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
                .unwrap();
            tracker.mark_failed(SourceTableKind::GenericJsonLog, start, end, 1, 0, Utc::now());
        }
        let err = tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap_err();
        assert_eq!(err, ClaimError::AttemptsExhausted);
    }

    #[test]
    fn running_window_cannot_be_claimed_concurrently() {
        let mut tracker = JobStateTracker::new();
        let (start, end) = window();
        tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap();
        let err = tracker
            .claim(SourceTableKind::GenericJsonLog, start, end, Utc::now())
            .unwrap_err();
        assert_eq!(err, ClaimError::AlreadyRunning);
    }
}
