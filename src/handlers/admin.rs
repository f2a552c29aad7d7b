//! Administrative endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::providers::{CircuitState, ProviderId};

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub provider: ProviderId,
    pub state: CircuitState,
}

/// POST /admin/breakers/{provider}/reset
///
/// Forces the provider's breaker to `Closed` with zeroed counters.
pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Json<ResetResponse>> {
    let id: ProviderId = provider.parse().map_err(AppError::Validation)?;
    let resolver = state.coordinator().resolver();

    if !resolver.reset_breaker(id).await {
        return Err(AppError::NotFound(format!(
            "provider '{}' has no circuit breaker",
            id
        )));
    }

    tracing::warn!(provider = %id, "Circuit breaker reset by administrator");
    Ok(Json(ResetResponse {
        provider: id,
        state: CircuitState::Closed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_reset_closes_an_open_breaker() {
        let state = test_support::state();
        let breaker = state
            .coordinator()
            .resolver()
            .breaker(ProviderId::Primary)
            .unwrap()
            .clone();
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let Json(body) = reset_breaker(State(state), Path("primary".to_string()))
            .await
            .unwrap();
        assert_eq!(body.provider, ProviderId::Primary);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_unknown_provider_is_bad_request() {
        let state = test_support::state();
        let err = reset_breaker(State(state), Path("tertiary".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reset_local_is_not_found() {
        let state = test_support::state();
        let err = reset_breaker(State(state), Path("local".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
