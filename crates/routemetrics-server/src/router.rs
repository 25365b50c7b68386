//! Axum router wiring for the demo server.
//!
//! Application routes first, then `with_route_metrics` so every route above
//! it (and the 404 fallback) is timed.

use axum::{
    extract::Path,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::{app_state::AppState, ops, plugin::{MetricsRouter, StatsId}};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/v1/users/:id", get(show_user))
        .with_route_metrics(state.metrics().clone())
        .with_state(state)
}

async fn show_user(Path(id): Path<String>) -> impl IntoResponse {
    (StatsId::new("users.show"), format!("user {id}"))
}
