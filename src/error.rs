//! Error types for Switchboard
//!
//! `AppError` is the top-level error and implements `IntoResponse` for Axum
//! handlers. Provider, classifier and dispatch failures have their own enums so
//! that retry and fallback decisions are made on types, not on message text.

use crate::providers::ProviderId;
use crate::router::Category;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Failure of a single attempt against a single provider
///
/// Only the rate-limit class (`RateLimited`, `Timeout`) is worth retrying
/// against the same provider. Everything else fails the attempt immediately
/// so the breaker's failure budget is not spent on errors a retry cannot fix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider} rate limited the request: {message}")]
    RateLimited { provider: String, message: String },

    #[error("{provider} did not respond within {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider} rejected credentials (HTTP {status})")]
    Unauthorized { provider: String, status: u16 },

    #[error("{provider} quota exhausted: {message}")]
    QuotaExhausted { provider: String, message: String },

    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    BadRequest {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} upstream error (HTTP {status}): {message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("{provider} stream interrupted after {bytes_received} bytes: {message}")]
    StreamInterrupted {
        provider: String,
        bytes_received: usize,
        message: String,
    },

    #[error("{provider} could not be loaded: {message}")]
    LoadFailed { provider: String, message: String },
}

impl ProviderError {
    /// Returns true for the rate-limit class of errors (rate limit, timeout)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }

    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Unauthorized { .. } => "unauthorized",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::BadRequest { .. } => "bad_request",
            Self::Upstream { .. } => "upstream",
            Self::Transport { .. } => "transport",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::StreamInterrupted { .. } => "stream_interrupted",
            Self::LoadFailed { .. } => "load_failed",
        }
    }
}

/// Hard errors raised while classifying a message
///
/// These never escape `Classifier::route`; they are converted into a
/// degraded `RoutingDecision` there.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("classifier response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("classifier response is not a JSON object")]
    NotAnObject,

    #[error("classifier response is missing field '{0}'")]
    MissingField(&'static str),

    #[error("classifier response field '{field}' has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Knowledge retrieval failure
///
/// Never fatal: the coordinator logs it and dispatches without retrieved context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("retrieval failed: {0}")]
    Failed(String),

    #[error("retrieval did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Why a provider could not serve a dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum Unavailability {
    NotConfigured,
    BreakerOpen,
    Failed(String),
}

impl std::fmt::Display for Unavailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "not configured"),
            Self::BreakerOpen => write!(f, "circuit breaker open"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One provider that was passed over during a dispatch, and why
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderUnavailability {
    pub provider: ProviderId,
    pub reason: Unavailability,
}

/// Errors raised by the specialist resolver
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No specialist available for {category}: {}", format_unavailable(.unavailable))]
    NoSpecialistAvailable {
        category: Category,
        unavailable: Vec<ProviderUnavailability>,
    },

    #[error("Local model failed: {0}")]
    LocalModel(ProviderError),
}

fn format_unavailable(unavailable: &[ProviderUnavailability]) -> String {
    if unavailable.is_empty() {
        return "no providers configured".to_string();
    }
    unavailable
        .iter()
        .map(|u| format!("{} ({})", u.provider, u.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
