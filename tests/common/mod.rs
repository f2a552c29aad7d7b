//! Shared fakes for integration tests
//!
//! `ScriptedProvider` answers from a queue of canned results, so tests can
//! script "rate limited twice, then succeed" without any network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard::error::ProviderError;
use switchboard::metrics::Metrics;
use switchboard::providers::{
    BreakerSettings, ChatProvider, CircuitBreaker, CompletionRequest, ProviderId, TextStream,
};
use switchboard::router::{Category, Classifier, RoutingDecision};

pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider that replays scripted results
pub struct ScriptedProvider {
    id: ProviderId,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    otherwise: Result<String, ProviderError>,
    stream_items: Option<Vec<Result<String, ProviderError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Provider that always answers `text`
    pub fn answering(id: ProviderId, text: &str) -> Self {
        Self {
            id,
            script: Mutex::new(VecDeque::new()),
            otherwise: Ok(text.to_string()),
            stream_items: None,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provider that always fails with `error`
    pub fn failing(id: ProviderId, error: ProviderError) -> Self {
        Self {
            otherwise: Err(error),
            ..Self::answering(id, "")
        }
    }

    /// Queue a result to be returned before falling back to the default one
    pub fn then(self, result: Result<&str, ProviderError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string));
        self
    }

    /// Items every `stream()` call yields, instead of chunking the scripted answer
    pub fn streaming(mut self, items: Vec<Result<&str, ProviderError>>) -> Self {
        self.stream_items = Some(
            items
                .into_iter()
                .map(|item| item.map(str::to_string))
                .collect(),
        );
        self
    }

    /// Sleep before answering each call
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    async fn next_result(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.otherwise.clone())
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.next_result(request).await
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream, ProviderError> {
        let answer = self.next_result(request).await;
        let items: Vec<Result<String, ProviderError>> = match &self.stream_items {
            Some(items) => items.clone(),
            None => answer?
                .split_inclusive(' ')
                .map(|word| Ok(word.to_string()))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Classifier that always returns the same decision
pub struct FixedClassifier(pub RoutingDecision);

impl FixedClassifier {
    pub fn category(category: Category) -> Arc<Self> {
        Arc::new(Self(RoutingDecision::new(
            category,
            Vec::new(),
            0.9,
            "fixed for test",
        )))
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn route(&self, _message: &str) -> RoutingDecision {
        self.0.clone()
    }
}

pub fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().expect("metrics should register"))
}

pub fn breaker(id: ProviderId) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(id, BreakerSettings::default()))
}

pub fn breaker_with_threshold(id: ProviderId, failure_threshold: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        id,
        BreakerSettings {
            failure_threshold,
            ..BreakerSettings::default()
        },
    ))
}

/// Force a breaker into `Open`
pub async fn trip(breaker: &CircuitBreaker) {
    for _ in 0..breaker.settings().failure_threshold {
        breaker.record_failure().await;
    }
}

pub fn rate_limited(id: ProviderId) -> ProviderError {
    ProviderError::RateLimited {
        provider: id.to_string(),
        message: "Rate limit reached for requests".to_string(),
    }
}

pub fn unauthorized(id: ProviderId) -> ProviderError {
    ProviderError::Unauthorized {
        provider: id.to_string(),
        status: 401,
    }
}

pub fn transport(id: ProviderId) -> ProviderError {
    ProviderError::Transport {
        provider: id.to_string(),
        message: "connection refused".to_string(),
    }
}
