//! Prometheus metrics endpoint

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP switchboard_requests_total Total chat requests by classified category
/// # TYPE switchboard_requests_total counter
/// switchboard_requests_total{category="general_chat"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> Response {
    match state.metrics().gather() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            output,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
                .into_response()
        }
    }
}
