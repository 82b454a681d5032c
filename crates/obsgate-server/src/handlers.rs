//! Route handlers for the gateway's external interface (`spec.md` §6).
//! Log search/aggregate/trace handlers talk to the Query Planner, Cost
//! Guard, and fact store directly rather than through the Tool Runtime —
//! the tool catalog exists for the agent orchestrator's own use, not as
//! the only way in.

use axum::extract::{Path, Query, State};
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use axum::Json;
use obsgate_orchestrator::Orchestrator;
use obsgate_planner::{build_aggregate, build_list, LogQueryRequest};
use obsgate_stream::{sse_stream, StreamConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::state::AppState;

const CHAT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    pub time_window_hours: Option<u32>,
    pub limit: Option<u32>,
    pub severity: Option<String>,
    pub service: Option<String>,
    pub search: Option<String>,
    pub trace_id: Option<String>,
    pub group_by: Option<String>,
}

impl LogQueryParams {
    fn into_request(self) -> Result<LogQueryRequest, GatewayError> {
        Ok(LogQueryRequest::new(
            self.time_window_hours,
            self.limit,
            self.severity.as_deref(),
            self.service,
            self.search,
            self.trace_id,
            self.group_by.as_deref(),
        )?)
    }
}

/// `GET /api/logs`: list rows within the cost guard's ceiling.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<Value>, GatewayError> {
    let req = params.into_request()?;
    let plan = build_list(&req);
    let estimated_bytes = state.cost_guard.check(&req, &plan).await?;
    let rows = state.fact_store.execute_list(&plan).await?;
    Ok(Json(json!({
        "rows": rows,
        "estimated_bytes": estimated_bytes,
        "returned_count": rows.len(),
    })))
}

/// `GET /api/logs/aggregate`: bucketed counts by `group_by`.
pub async fn aggregate_logs(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<Value>, GatewayError> {
    let req = params.into_request()?;
    let Some(group_by) = req.group_by else {
        return Err(GatewayError::UsageError(
            "group_by is required for log aggregation".to_string(),
        ));
    };
    let plan = build_aggregate(&req, group_by);
    let estimated_bytes = state.cost_guard.check(&req, &plan).await?;
    let buckets = state.fact_store.execute_aggregate(&plan).await?;
    Ok(Json(json!({
        "buckets": buckets.into_iter().map(|(key, count)| json!({"key": key, "count": count})).collect::<Vec<_>>(),
        "estimated_bytes": estimated_bytes,
    })))
}

/// `GET /api/traces/:trace_id`: every row sharing a trace, time-ordered.
pub async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let rows = state.fact_store.trace_lookup(&trace_id).await?;
    Ok(Json(json!({ "trace_id": trace_id, "rows": rows })))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsParams {
    pub user_id: Option<String>,
}

/// `GET /api/sessions`.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsParams>,
) -> Result<Json<Value>, GatewayError> {
    let sessions = state
        .session_store
        .list_sessions(params.user_id.as_deref())
        .await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// `GET /api/sessions/:id/messages`.
pub async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    state
        .session_store
        .get_session(&session_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("session `{session_id}` not found")))?;
    let messages = state.session_store.list_messages(&session_id).await?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub message: String,
    pub model: Option<String>,
}

/// `POST /api/chat`: drives one orchestrator run and relays its events as an
/// SSE stream framed by the Stream Channel (C8).
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    if request.message.trim().is_empty() {
        return Err(GatewayError::UsageError("message must not be empty".to_string()));
    }

    let session = match request.session_id {
        Some(id) => state
            .session_store
            .get_session(&id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("session `{id}` not found")))?,
        None => {
            state
                .session_store
                .create_session(request.user_id.as_deref().unwrap_or("anonymous"), &request.message)
                .await?
        }
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let model = request.model.unwrap_or_else(|| "default".to_string());
    let budget_max = state.config.token_budget_max;

    let orchestrator = Orchestrator::new(state.provider.clone(), state.tools.clone(), state.session_store.clone())
        .with_tool_fanout_max(state.config.tool_fanout_max as usize);

    let (tx, rx) = mpsc::channel(CHAT_EVENT_BUFFER);
    let capacity_probe = tx.clone();
    let cancel = CancellationToken::new();

    let session_id = session.id.clone();
    let message = request.message.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator
            .run(&run_id, &session_id, budget_max, &model, &message, tx, cancel)
            .await
        {
            tracing::warn!(%err, run_id = %run_id, "orchestrator run ended with an error");
        }
    });

    let config = StreamConfig {
        heartbeat: std::time::Duration::from_secs(state.config.stream_heartbeat_seconds),
        slow_consumer_after: std::time::Duration::from_secs(state.config.stream_slow_consumer_seconds),
    };
    Ok(Sse::new(sse_stream(rx, capacity_probe, config)))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub session_store_ok: bool,
    pub fact_store_ok: bool,
    pub vector_store_ok: bool,
}

/// `GET /health`: degrades rather than 500s when a dependency is reachable
/// but behaving oddly — only a hard connection failure flips `status` to
/// `degraded` (`spec.md` §6 health semantics). The vector index is
/// non-critical: its probe failing alone still reports `degraded`, not
/// `unavailable`, since `similar_errors` is one tool among several and the
/// session/fact stores remain the hard dependency for everything else.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let session_store_ok = state.session_store.list_sessions(None).await.is_ok();
    let fact_store_ok = state.fact_store.trace_lookup("__health_check__").await.is_ok();
    let probe_vector = vec![0.0_f32; state.vector_store.dimension()];
    let vector_store_ok = state
        .vector_store
        .nearest_clusters(&probe_vector, 1, chrono::Utc::now())
        .await
        .is_ok();
    let status = if session_store_ok && fact_store_ok && vector_store_ok {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        session_store_ok,
        fact_store_ok,
        vector_store_ok,
    })
}
