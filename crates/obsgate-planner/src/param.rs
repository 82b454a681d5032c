use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;

/// A single named-parameter value. Kept as an explicit enum (rather than
/// accepting `&dyn ToSql` directly) so the planner's output — a
/// `{sql_template, parameter_map}` pair — can be inspected, logged, and
/// asserted against in tests without a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
}

impl ParamValue {
    pub fn timestamp(ts: DateTime<Utc>) -> Self {
        ParamValue::Text(ts.to_rfc3339())
    }
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ParamValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            ParamValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
        })
    }
}

/// A fully-built query: a template with named placeholders (`:name`) and the
/// parameter values bound to each placeholder. String interpolation of
/// caller-supplied values into `sql_template` is forbidden everywhere in this
/// crate — `spec.md` §4.2.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub sql_template: String,
    pub parameter_map: Vec<(String, ParamValue)>,
}

impl PlannedQuery {
    /// Parameters in the shape `rusqlite::Statement::execute_named`/`query`
    /// style callers expect: `(":name", &dyn ToSql)`.
    pub fn bind_pairs(&self) -> Vec<(&str, &dyn ToSql)> {
        self.parameter_map
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}
