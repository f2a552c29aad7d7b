//! Provider capability and health tracking
//!
//! Every backend (cloud provider A, cloud provider B, local model) is a
//! `ChatProvider`. The resolver holds an ordered list of providers, each
//! paired with its own `CircuitBreaker` (the local model has none).

pub mod breaker;
pub mod lazy;
pub mod openai;

pub use breaker::{Admission, BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use lazy::{LazyProvider, LocalModelLoader, ProviderLoader};
pub use openai::OpenAiProvider;

use crate::error::ProviderError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identity of a provider slot, in fixed priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Cloud provider A (tried first)
    Primary,
    /// Cloud provider B
    Secondary,
    /// Locally hosted model (resilience backstop, never circuit-broken)
    Local,
}

impl ProviderId {
    /// All provider slots in priority order
    pub const PRIORITY: [ProviderId; 3] =
        [ProviderId::Primary, ProviderId::Secondary, ProviderId::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "unknown provider '{}' (expected primary, secondary or local)",
                other
            )),
        }
    }
}

/// A single prompt submitted to a provider
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Optional system instruction
    pub system: Option<String>,
    /// User-visible prompt text
    pub prompt: String,
    /// Sampling temperature override (provider default when `None`)
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Incremental text output of a streaming completion
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// Chat-completion capability of one backend
///
/// Implementations perform exactly one attempt per call. Timeouts, retries
/// and breaker bookkeeping are applied by the caller.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Identity used in logs, metrics and dispatch results
    fn id(&self) -> ProviderId;

    /// Buffered completion
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Streaming completion
    ///
    /// An `Err` from this method means the stream could not be opened.
    /// Errors yielded by the stream are mid-stream failures.
    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream, ProviderError>;
}
