use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::{audit, deposits, handlers, middleware::metrics_middleware, pipeline};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Pipeline control
        .route("/pipeline", get(pipeline::get_status))
        .route("/pipeline/quiet", post(pipeline::quiet))
        .route("/pipeline/unquiet", post(pipeline::unquiet))
        .route("/pipeline/stop", post(pipeline::stop))
        // Deposits (read-only)
        .route("/deposits", get(deposits::list_deposits))
        .route("/deposits/{id}", get(deposits::get_deposit));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(metrics_middleware)),
        )
        .with_state(state)
}
