//! Shared application state, grounded on the teacher's `AppState`
//! (`tandem-server/src/lib.rs`): one `Clone`-able handle threaded through
//! every handler via axum's `State` extractor, holding the component
//! instances routes need rather than re-opening connections per request.

use std::sync::Arc;

use obsgate_config::GatewayConfig;
use obsgate_costguard::CostGuard;
use obsgate_providers::Provider;
use obsgate_store::SessionStore;
use obsgate_tools::{FactStore, FactStoreEstimator, ToolRegistry};
use obsgate_vector::VectorStore;

#[derive(Clone)]
pub struct AppState {
    pub session_store: SessionStore,
    pub fact_store: FactStore,
    pub vector_store: VectorStore,
    pub tools: ToolRegistry,
    pub cost_guard: Arc<CostGuard<FactStoreEstimator>>,
    pub provider: Arc<dyn Provider>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(
        session_store: SessionStore,
        fact_store: FactStore,
        vector_store: VectorStore,
        tools: ToolRegistry,
        cost_guard: Arc<CostGuard<FactStoreEstimator>>,
        provider: Arc<dyn Provider>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            session_store,
            fact_store,
            vector_store,
            tools,
            cost_guard,
            provider,
            config,
        }
    }
}
