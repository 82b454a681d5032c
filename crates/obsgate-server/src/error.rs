//! HTTP error taxonomy, grounded on the teacher's ad-hoc `(StatusCode, Json)`
//! responses in `tandem-server/src/http.rs`, but collected into one
//! `IntoResponse` mapping per `spec.md` §7. Every response carries a
//! correlation id; only 4xx responses carry a `detail` message, so an
//! `InternalError` never leaks implementation detail to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("usage error: {0}")]
    UsageError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct UsageErrorBody {
    error: &'static str,
    detail: String,
    correlation_id: String,
}

#[derive(Serialize)]
struct InternalErrorBody {
    error: &'static str,
    correlation_id: String,
}

impl GatewayError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::UsageError(_) => (StatusCode::BAD_REQUEST, "usage_error"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::BudgetExceeded(_) => (StatusCode::TOO_MANY_REQUESTS, "budget_exceeded"),
            GatewayError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            GatewayError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            GatewayError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let (status, kind) = self.status_and_kind();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(%correlation_id, error = %self, "internal error");
            return (
                status,
                Json(InternalErrorBody {
                    error: kind,
                    correlation_id,
                }),
            )
                .into_response();
        }

        tracing::warn!(%correlation_id, error = %self, "request rejected");
        (
            status,
            Json(UsageErrorBody {
                error: kind,
                detail: self.to_string(),
                correlation_id,
            }),
        )
            .into_response()
    }
}

impl From<obsgate_store::StoreError> for GatewayError {
    fn from(err: obsgate_store::StoreError) -> Self {
        match err {
            obsgate_store::StoreError::SessionNotFound(id) => {
                GatewayError::NotFound(format!("session `{id}` not found"))
            }
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

impl From<obsgate_planner::PlannerUsageError> for GatewayError {
    fn from(err: obsgate_planner::PlannerUsageError) -> Self {
        GatewayError::UsageError(err.to_string())
    }
}

impl From<obsgate_costguard::CostGuardError> for GatewayError {
    fn from(err: obsgate_costguard::CostGuardError) -> Self {
        GatewayError::BudgetExceeded(err.to_string())
    }
}

impl From<obsgate_tools::FactStoreError> for GatewayError {
    fn from(err: obsgate_tools::FactStoreError) -> Self {
        GatewayError::InternalError(err.to_string())
    }
}
