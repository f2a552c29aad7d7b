//! Health check endpoint
//!
//! Reports the circuit breaker of every cloud provider, so operators can see
//! which providers are currently being skipped.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::providers::{CircuitState, ProviderId};

/// Breaker view of one cloud provider
#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub successes_in_half_open: u32,
    /// Seconds until an open breaker starts probing again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reopens_in_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "OK" when at least one provider can take calls, "degraded" otherwise
    pub status: &'static str,
    pub providers: Vec<ProviderHealth>,
    pub local_configured: bool,
}

pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let resolver = state.coordinator().resolver();
    let now = tokio::time::Instant::now();

    let providers: Vec<ProviderHealth> = resolver
        .breaker_snapshots()
        .await
        .into_iter()
        .map(|(provider, snapshot)| ProviderHealth {
            provider,
            state: snapshot.state,
            consecutive_failures: snapshot.consecutive_failures,
            successes_in_half_open: snapshot.successes_in_half_open,
            reopens_in_seconds: match snapshot.state {
                CircuitState::Open => snapshot
                    .open_until
                    .map(|until| until.saturating_duration_since(now).as_secs()),
                _ => None,
            },
        })
        .collect();

    let local_configured = resolver.configured().contains(&ProviderId::Local);
    let any_available = local_configured
        || providers
            .iter()
            .any(|p| p.state != CircuitState::Open);

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: if any_available { "OK" } else { "degraded" },
            providers,
            local_configured,
        }),
    )
}
