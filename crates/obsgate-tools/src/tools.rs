use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use obsgate_contract::CanonicalLogRow;
use obsgate_costguard::{CostGuard, CostGuardError};
use obsgate_planner::{build_aggregate, build_list, LogQueryRequest, PlannerUsageError};
use obsgate_vector::{embedding_text, Embedder, VectorStore};
use serde_json::{json, Value};

use crate::fact_store::{FactStore, FactStoreEstimator};
use crate::invocation::{InvocationRecorder, InvocationStatus};

/// Wraps the Tool Runtime's structured error surface. Never raised through
/// to the stream directly — the orchestrator only ever sees a completed
/// [`ToolResult`] (`spec.md` §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub status: ToolResultStatus,
    pub output: Value,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultStatus {
    Completed,
    Error,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            status: ToolResultStatus::Completed,
            output,
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: ToolResultStatus::Error,
            output: Value::Null,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn invoke(&self, args: Value) -> ToolResult;
}

fn request_from_args(args: &Value) -> Result<LogQueryRequest, PlannerUsageError> {
    LogQueryRequest::new(
        args.get("time_window_hours").and_then(Value::as_u64).map(|v| v as u32),
        args.get("limit").and_then(Value::as_u64).map(|v| v as u32),
        args.get("severity").and_then(Value::as_str),
        args.get("service").and_then(Value::as_str).map(ToString::to_string),
        args.get("search").and_then(Value::as_str).map(ToString::to_string),
        args.get("trace_id").and_then(Value::as_str).map(ToString::to_string),
        args.get("group_by").and_then(Value::as_str),
    )
}

fn rows_to_json(rows: &[CanonicalLogRow]) -> Value {
    json!(rows)
}

pub struct LogSearchTool {
    pub store: FactStore,
    pub cost_guard: Arc<CostGuard<FactStoreEstimator>>,
}

#[async_trait]
impl Tool for LogSearchTool {
    fn name(&self) -> &'static str {
        "log_search"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "time_window_hours": {"type": "integer"},
                "limit": {"type": "integer"},
                "severity": {"type": "string"},
                "service": {"type": "string"},
                "search": {"type": "string"},
                "trace_id": {"type": "string"}
            }
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let req = match request_from_args(&args) {
            Ok(req) => req,
            Err(err) => return ToolResult::error(err.to_string()),
        };
        let plan = build_list(&req);
        let estimated_bytes = match self.cost_guard.check(&req, &plan).await {
            Ok(bytes) => bytes,
            Err(err) => return ToolResult::error(err.to_string()),
        };
        match self.store.execute_list(&plan).await {
            Ok(rows) => ToolResult::ok(json!({
                "rows": rows_to_json(&rows),
                "estimated_bytes": estimated_bytes,
                "returned_count": rows.len(),
            })),
            Err(err) => ToolResult::error(err.to_string()),
        }
    }
}

pub struct LogAggregateTool {
    pub store: FactStore,
    pub cost_guard: Arc<CostGuard<FactStoreEstimator>>,
}

#[async_trait]
impl Tool for LogAggregateTool {
    fn name(&self) -> &'static str {
        "log_aggregate"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "time_window_hours": {"type": "integer"},
                "limit": {"type": "integer"},
                "severity": {"type": "string"},
                "service": {"type": "string"},
                "search": {"type": "string"},
                "group_by": {"type": "string"}
            },
            "required": ["group_by"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let req = match request_from_args(&args) {
            Ok(req) => req,
            Err(err) => return ToolResult::error(err.to_string()),
        };
        let Some(group_by) = req.group_by else {
            return ToolResult::error("group_by is required for log_aggregate");
        };
        let plan = build_aggregate(&req, group_by);
        let estimated_bytes = match self.cost_guard.check(&req, &plan).await {
            Ok(bytes) => bytes,
            Err(err) => return ToolResult::error(err.to_string()),
        };
        match self.store.execute_aggregate(&plan).await {
            Ok(buckets) => ToolResult::ok(json!({
                "buckets": buckets.into_iter().map(|(key, count)| json!({"key": key, "count": count})).collect::<Vec<_>>(),
                "estimated_bytes": estimated_bytes,
            })),
            Err(err) => ToolResult::error(err.to_string()),
        }
    }
}

pub struct TraceLookupTool {
    pub store: FactStore,
}

#[async_trait]
impl Tool for TraceLookupTool {
    fn name(&self) -> &'static str {
        "trace_lookup"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"trace_id": {"type": "string"}},
            "required": ["trace_id"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let Some(trace_id) = args.get("trace_id").and_then(Value::as_str) else {
            return ToolResult::error("trace_id is required");
        };
        match self.store.trace_lookup(trace_id).await {
            Ok(rows) => ToolResult::ok(json!({"rows": rows_to_json(&rows)})),
            Err(err) => ToolResult::error(err.to_string()),
        }
    }
}

pub struct SimilarErrorsTool {
    pub store: FactStore,
    pub vector: VectorStore,
    pub embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl Tool for SimilarErrorsTool {
    fn name(&self) -> &'static str {
        "similar_errors"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "row_id": {"type": "string"},
                "k": {"type": "integer"}
            }
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5).clamp(1, 50) as usize;

        let query_text = if let Some(text) = args.get("text").and_then(Value::as_str) {
            text.to_string()
        } else if let Some(row_id) = args.get("row_id").and_then(Value::as_str) {
            match self.store.get_by_log_id(row_id).await {
                Ok(Some(row)) => embedding_text(row.severity, &row.service_name, &row.message),
                Ok(None) => return ToolResult::error(format!("row_id `{row_id}` not found")),
                Err(err) => return ToolResult::error(err.to_string()),
            }
        } else {
            return ToolResult::error("one of `text` or `row_id` is required");
        };

        let vector = match self.embedder.embed(&query_text) {
            Ok(v) => v,
            Err(err) => return ToolResult::error(err.to_string()),
        };

        match self.vector.nearest_clusters(&vector, k, self.store.now()).await {
            Ok(scored) => {
                let clusters: Vec<Value> = scored
                    .iter()
                    .map(|(cluster, similarity)| {
                        json!({
                            "cluster_id": cluster.cluster_id,
                            "representative_message": cluster.representative_message,
                            "count": cluster.count,
                            "similarity": similarity,
                        })
                    })
                    .collect();
                let nearest_members: Vec<&String> =
                    scored.iter().flat_map(|(c, _)| c.member_ids.iter()).collect();
                ToolResult::ok(json!({
                    "clusters": clusters,
                    "nearest_members": nearest_members,
                }))
            }
            Err(err) => ToolResult::error(err.to_string()),
        }
    }
}

pub struct DryRunTool {
    pub cost_guard: Arc<CostGuard<FactStoreEstimator>>,
}

#[async_trait]
impl Tool for DryRunTool {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "time_window_hours": {"type": "integer"},
                "limit": {"type": "integer"},
                "severity": {"type": "string"},
                "service": {"type": "string"},
                "search": {"type": "string"},
                "trace_id": {"type": "string"}
            }
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let req = match request_from_args(&args) {
            Ok(req) => req,
            Err(err) => return ToolResult::error(err.to_string()),
        };
        let plan = build_list(&req);
        match self.cost_guard.check(&req, &plan).await {
            Ok(estimated_bytes) => ToolResult::ok(json!({"estimated_bytes": estimated_bytes})),
            Err(CostGuardError::BudgetExceeded { estimated_bytes, ceiling }) => {
                ToolResult::error(format!(
                    "estimated {estimated_bytes} bytes exceeds ceiling {ceiling}"
                ))
            }
            Err(err) => ToolResult::error(err.to_string()),
        }
    }
}

/// Typed catalog of `spec.md` §4.6 tools, wrapping every call with input
/// validation (delegated to each [`Tool`]), a monotonic invocation id,
/// timing, and status transitions via [`InvocationRecorder`].
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<&'static str, Arc<dyn Tool>>>,
    recorder: InvocationRecorder,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut map = HashMap::new();
        for tool in tools {
            map.insert(tool.name(), tool);
        }
        Self {
            tools: Arc::new(map),
            recorder: InvocationRecorder::new(),
        }
    }

    pub fn recorder(&self) -> &InvocationRecorder {
        &self.recorder
    }

    pub fn schemas(&self) -> Vec<(&'static str, Value)> {
        let mut out: Vec<_> = self
            .tools
            .values()
            .map(|t| (t.name(), t.input_schema()))
            .collect();
        out.sort_by_key(|(name, _)| *name);
        out
    }

    pub async fn invoke(&self, session_id: &str, name: &str, args: Value) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(format!("unknown tool `{name}`"));
        };
        let invocation = self.recorder.start(session_id, name, args.clone()).await;
        let result = tool.invoke(args).await;
        let status = match result.status {
            ToolResultStatus::Completed => InvocationStatus::Completed,
            ToolResultStatus::Error => InvocationStatus::Error,
        };
        let telemetry_output = match result.status {
            ToolResultStatus::Completed => result.output.clone(),
            ToolResultStatus::Error => json!({"reason": result.reason.clone()}),
        };
        self.recorder.finish(invocation.id, status, telemetry_output).await;
        result
    }
}
