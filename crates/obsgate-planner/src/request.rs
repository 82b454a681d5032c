use obsgate_contract::{GroupByField, Severity, UnknownGroupBy};
use serde::Deserialize;

pub const MIN_TIME_WINDOW_HOURS: u32 = 1;
pub const MAX_TIME_WINDOW_HOURS: u32 = 720;
pub const DEFAULT_TIME_WINDOW_HOURS: u32 = 24;
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 1000;
pub const DEFAULT_LIMIT: u32 = 100;

/// Caller-supplied request. Every field is validated by [`LogQueryRequest::new`]
/// before a planner will touch it; there is no "runtime fallback" path for an
/// omitted time filter, per `spec.md` §4.2.
#[derive(Debug, Clone, Deserialize)]
pub struct LogQueryRequest {
    pub time_window_hours: u32,
    pub limit: u32,
    pub severity: Option<Severity>,
    pub service: Option<String>,
    pub search: Option<String>,
    pub trace_id: Option<String>,
    pub group_by: Option<GroupByField>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlannerUsageError {
    #[error("invalid severity `{0}`")]
    InvalidSeverity(String),
    #[error("limit {0} out of range [{MIN_LIMIT}, {MAX_LIMIT}]")]
    LimitOutOfRange(u32),
    #[error("time_window_hours {0} out of range [{MIN_TIME_WINDOW_HOURS}, {MAX_TIME_WINDOW_HOURS}]")]
    TimeWindowOutOfRange(u32),
    #[error("unknown group_by field `{0}`")]
    UnknownGroupBy(String),
}

impl From<UnknownGroupBy> for PlannerUsageError {
    fn from(value: UnknownGroupBy) -> Self {
        PlannerUsageError::UnknownGroupBy(value.0)
    }
}

impl LogQueryRequest {
    /// Builder used by HTTP handlers: raw strings in, a validated request or
    /// a `PlannerUsageError` out. Never silently clamps a value.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time_window_hours: Option<u32>,
        limit: Option<u32>,
        severity: Option<&str>,
        service: Option<String>,
        search: Option<String>,
        trace_id: Option<String>,
        group_by: Option<&str>,
    ) -> Result<Self, PlannerUsageError> {
        let time_window_hours = time_window_hours.unwrap_or(DEFAULT_TIME_WINDOW_HOURS);
        if !(MIN_TIME_WINDOW_HOURS..=MAX_TIME_WINDOW_HOURS).contains(&time_window_hours) {
            return Err(PlannerUsageError::TimeWindowOutOfRange(time_window_hours));
        }

        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(PlannerUsageError::LimitOutOfRange(limit));
        }

        let severity = severity
            .map(|s| {
                s.parse::<Severity>()
                    .map_err(|e| PlannerUsageError::InvalidSeverity(e.0))
            })
            .transpose()?;

        let group_by = group_by
            .map(|g| g.parse::<GroupByField>().map_err(PlannerUsageError::from))
            .transpose()?;

        Ok(Self {
            time_window_hours,
            limit,
            severity,
            service,
            search,
            trace_id,
            group_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_zero_is_usage_error() {
        let err = LogQueryRequest::new(Some(24), Some(0), None, None, None, None, None)
            .unwrap_err();
        assert_eq!(err, PlannerUsageError::LimitOutOfRange(0));
    }

    #[test]
    fn limit_at_max_succeeds() {
        let req =
            LogQueryRequest::new(Some(24), Some(MAX_LIMIT), None, None, None, None, None)
                .unwrap();
        assert_eq!(req.limit, MAX_LIMIT);
    }

    #[test]
    fn hours_over_max_is_rejected() {
        let err = LogQueryRequest::new(
            Some(MAX_TIME_WINDOW_HOURS + 1),
            Some(10),
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PlannerUsageError::TimeWindowOutOfRange(MAX_TIME_WINDOW_HOURS + 1)
        );
    }

    #[test]
    fn unknown_group_by_is_rejected() {
        let err = LogQueryRequest::new(
            Some(24),
            Some(10),
            None,
            None,
            None,
            None,
            Some("bogus"),
        )
        .unwrap_err();
        assert!(matches!(err, PlannerUsageError::UnknownGroupBy(_)));
    }
}
