use chrono::{Duration, Utc};
use obsgate_contract::GroupByField;

use crate::param::{ParamValue, PlannedQuery};
use crate::request::LogQueryRequest;

const CANONICAL_VIEW: &str = "canonical_log_view";

/// Builds the parameterized `SELECT ...` for a row listing. Invariants
/// enforced here (`spec.md` §8 property 1):
/// - exactly one `event_ts >=` predicate (partition pruning)
/// - exactly one `LIMIT`
/// - no string interpolation of caller input
pub fn build_list(req: &LogQueryRequest) -> PlannedQuery {
    let mut clauses = vec!["event_ts >= :event_ts_from".to_string()];
    let mut params = vec![(
        ":event_ts_from".to_string(),
        ParamValue::timestamp(Utc::now() - Duration::hours(req.time_window_hours as i64)),
    )];

    if let Some(trace_id) = &req.trace_id {
        // trace_id queries bypass service/severity filters (trace reconstruction).
        clauses.push("trace_id = :trace_id".to_string());
        params.push((":trace_id".to_string(), ParamValue::Text(trace_id.clone())));
    } else {
        if let Some(severity) = &req.severity {
            clauses.push("severity_level >= :severity_level".to_string());
            params.push((
                ":severity_level".to_string(),
                ParamValue::Integer(severity.level() as i64),
            ));
        }
        if let Some(service) = &req.service {
            clauses.push("service_name = :service".to_string());
            params.push((":service".to_string(), ParamValue::Text(service.clone())));
        }
    }

    if let Some(search) = &req.search {
        clauses.push("(message LIKE :search_pattern ESCAPE '\\' OR display_message LIKE :search_pattern ESCAPE '\\')".to_string());
        params.push((
            ":search_pattern".to_string(),
            ParamValue::Text(containment_pattern(search)),
        ));
    }

    params.push((":limit".to_string(), ParamValue::Integer(req.limit as i64)));

    let sql_template = format!(
        "SELECT * FROM {CANONICAL_VIEW} WHERE {} ORDER BY event_ts DESC LIMIT :limit",
        clauses.join(" AND ")
    );

    PlannedQuery {
        sql_template,
        parameter_map: params,
    }
}

/// Builds the parameterized aggregate query. Adds `GROUP BY group_by` and
/// orders by count desc, per `spec.md` §4.2.
pub fn build_aggregate(req: &LogQueryRequest, group_by: GroupByField) -> PlannedQuery {
    let mut inner = build_list(req);
    // Drop the inner LIMIT/ORDER BY; the outer aggregate gets its own.
    inner.sql_template = inner
        .sql_template
        .replace(" ORDER BY event_ts DESC LIMIT :limit", "");
    inner.parameter_map.retain(|(name, _)| name != ":limit");
    inner
        .parameter_map
        .push((":limit".to_string(), ParamValue::Integer(req.limit as i64)));

    let column = group_by.column();
    let sql_template = inner
        .sql_template
        .replacen(
            &format!("SELECT * FROM {CANONICAL_VIEW}"),
            &format!("SELECT {column} AS key, COUNT(*) AS count FROM {CANONICAL_VIEW}"),
            1,
        )
        + &format!(" GROUP BY {column} ORDER BY count DESC LIMIT :limit");

    PlannedQuery {
        sql_template,
        parameter_map: inner.parameter_map,
    }
}

/// Prefix-safe containment: no regular expressions on the hot path
/// (`spec.md` §4.2). Escapes `%`/`_`/`\` so the search term is matched as a
/// literal substring via `LIKE ... ESCAPE '\'`.
fn containment_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::LogQueryRequest;
    use obsgate_contract::Severity;

    fn base_request() -> LogQueryRequest {
        LogQueryRequest::new(Some(24), Some(10), None, None, None, None, None).unwrap()
    }

    #[test]
    fn list_has_one_time_predicate_and_one_limit() {
        let plan = build_list(&base_request());
        assert_eq!(plan.sql_template.matches("event_ts >=").count(), 1);
        assert_eq!(plan.sql_template.matches("LIMIT").count(), 1);
    }

    #[test]
    fn aggregate_adds_group_by_and_order_by_count() {
        let plan = build_aggregate(&base_request(), GroupByField::Severity);
        assert!(plan.sql_template.contains("GROUP BY severity"));
        assert!(plan.sql_template.contains("ORDER BY count DESC"));
        assert_eq!(plan.sql_template.matches("LIMIT").count(), 1);
    }

    #[test]
    fn trace_id_bypasses_service_and_severity() {
        let mut req = base_request();
        req.trace_id = Some("abc".into());
        req.severity = Some(Severity::Error);
        req.service = Some("checkout".into());
        let plan = build_list(&req);
        assert!(plan.sql_template.contains("trace_id = :trace_id"));
        assert!(!plan.sql_template.contains("severity_level"));
        assert!(!plan.sql_template.contains("service_name"));
    }

    #[test]
    fn search_term_is_never_interpolated_into_sql() {
        let mut req = base_request();
        req.search = Some("'; DROP TABLE logs; --".into());
        let plan = build_list(&req);
        assert!(!plan.sql_template.contains("DROP TABLE"));
        assert!(plan
            .parameter_map
            .iter()
            .any(|(name, _)| name == ":search_pattern"));
    }

    #[test]
    fn search_pattern_escapes_like_wildcards() {
        let pattern = containment_pattern("50%_off");
        assert_eq!(pattern, "%50\\%\\_off%");
    }
}
