//! Query Planner (C2): builds parameterized column-store queries from
//! validated request structs. Never touches a source table directly — it
//! only ever addresses the canonical view (C1).

mod param;
mod plan;
mod request;

pub use obsgate_contract::GroupByField;
pub use param::{ParamValue, PlannedQuery};
pub use plan::{build_aggregate, build_list};
pub use request::{
    LogQueryRequest, PlannerUsageError, DEFAULT_LIMIT, DEFAULT_TIME_WINDOW_HOURS, MAX_LIMIT,
    MAX_TIME_WINDOW_HOURS, MIN_LIMIT, MIN_TIME_WINDOW_HOURS,
};
