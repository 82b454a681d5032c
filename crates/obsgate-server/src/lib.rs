//! HTTP API (`spec.md` §6): the gateway's only external surface over the
//! Query Planner/Cost Guard, the Tool Runtime, and the Agent Orchestrator.
//! Router assembly is grounded on the teacher's `app_router`/`serve`
//! (`tandem-server/src/http.rs`), narrowed to this system's routes.

mod error;
mod handlers;
mod state;

pub use error::GatewayError;
pub use state::AppState;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/logs", get(handlers::list_logs))
        .route("/api/logs/aggregate", get(handlers::aggregate_logs))
        .route("/api/traces/{trace_id}", get(handlers::get_trace))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions/{id}/messages", get(handlers::session_messages))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// Binds and serves the router until ctrl-c, mirroring the teacher's
/// graceful-shutdown `axum::serve` call.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "obsgate-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use obsgate_costguard::CostGuard;
    use obsgate_providers::FakeProvider;
    use obsgate_store::SessionStore;
    use obsgate_tools::{FactStore, FactStoreEstimator, ToolRegistry};
    use obsgate_vector::VectorStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let session_store = SessionStore::open_in_memory().await.unwrap();
        let fact_store = FactStore::open_in_memory().await.unwrap();
        let vector_store = VectorStore::open_in_memory(4).await.unwrap();
        let cost_guard = Arc::new(CostGuard::new(FactStoreEstimator::new(fact_store.clone())));
        let provider = Arc::new(FakeProvider {
            canned_answer: "all clear".to_string(),
        });
        AppState::new(
            session_store,
            fact_store,
            vector_store,
            ToolRegistry::new(vec![]),
            cost_guard,
            provider,
            Arc::new(obsgate_config::GatewayConfig::default()),
        )
    }

    #[tokio::test]
    async fn health_reports_ok_against_fresh_in_memory_stores() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_logs_rejects_an_out_of_range_limit() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/logs?limit=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_messages_for_unknown_session_is_404() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/does-not-exist/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn aggregate_logs_without_group_by_is_a_usage_error() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/logs/aggregate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
