//! HTTP request handlers for the Switchboard API

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::router::LlmClassifier;
use crate::specialists::SpecialistResolver;
use std::sync::Arc;
use std::time::Duration;

pub mod admin;
pub mod chat;
pub mod health;
pub mod metrics;
pub mod stream;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    coordinator: Arc<Coordinator>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the classifier, resolver and coordinator from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if metrics registration fails, a cloud provider
    /// cannot be constructed, or the classifier's provider slot is empty.
    pub fn from_config(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?);

        let resolver = Arc::new(SpecialistResolver::from_config(&config, metrics.clone())?);

        let classifier_provider = resolver.provider(config.classifier.provider).ok_or_else(|| {
            AppError::Config(format!(
                "classifier.provider = \"{}\" but that provider is not configured",
                config.classifier.provider
            ))
        })?;
        let classifier = LlmClassifier::new(
            classifier_provider,
            config.classifier.temperature,
            Duration::from_secs(config.classifier.timeout_seconds),
            metrics.clone(),
        );

        let coordinator = Coordinator::new(Arc::new(classifier), resolver, metrics.clone());

        Ok(Self::new(config, Arc::new(coordinator), metrics))
    }

    /// Assemble state from already-built parts
    pub fn new(config: Arc<Config>, coordinator: Arc<Coordinator>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            coordinator,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Build the Axum router with every endpoint and the shared middleware
pub fn app(state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/chat", post(chat::handler))
        .route("/chat/stream", post(stream::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/admin/breakers/{provider}/reset", post(admin::reset_breaker))
        .layer(axum::middleware::from_fn(
            crate::middleware::request_id_middleware,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
