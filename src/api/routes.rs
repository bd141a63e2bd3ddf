//! API route definitions

use super::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // ====================================================================
        // Nodes
        // ====================================================================
        .route("/api/nodes", post(handlers::ingest_node))
        .route("/api/nodes/changed", get(handlers::changed_nodes))
        .route(
            "/api/nodes/{id}/tags/suggest",
            post(handlers::suggest_tags),
        )
        // ====================================================================
        // Discovery
        // ====================================================================
        .route("/api/discovery/runs", post(handlers::trigger_run))
        .route("/api/discovery/runs/{run_id}", get(handlers::get_run))
        // ====================================================================
        // Insights
        // ====================================================================
        .route("/api/insights/digests", post(handlers::summarize_period))
        .route(
            "/api/insights/digests/{period}/{start}",
            get(handlers::get_digest),
        )
        // ====================================================================
        // LLM providers and costs
        // ====================================================================
        .route("/api/llm/costs", get(handlers::get_costs))
        .route("/api/llm/providers", get(handlers::list_providers))
        .route("/api/llm/providers/{name}/test", post(handlers::test_provider))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
