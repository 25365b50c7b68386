//! Operational HTTP endpoints.
//!
//! - `/healthz`   : liveness
//! - `<endpoint>` : Prometheus text format (path from `metrics.endpoint`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::plugin::RouteMetrics;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Render the configured registry. Encoding failures become a 500.
pub async fn scrape(State(metrics): State<RouteMetrics>) -> Response {
    match metrics.scrape() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
