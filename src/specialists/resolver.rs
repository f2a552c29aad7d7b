//! Provider-priority specialist resolver and executor
//!
//! Providers are tried in the fixed order primary → secondary → local:
//!
//! 1. A cloud provider whose breaker forbids calls is skipped.
//! 2. A permitted cloud call runs under the retry policy; its final outcome
//!    is recorded on the breaker exactly once.
//! 3. The local model, when reached, is attempted once. Its result is
//!    returned or its error propagates; there is nothing after it.
//! 4. When every provider was skipped or failed the dispatch fails with
//!    `DispatchError::NoSpecialistAvailable`, naming each provider and why.
//!
//! The streaming variant walks the same order. A provider that fails after
//! emitting text counts as a failure and the next provider continues the
//! stream; text already emitted is not retracted.

use crate::config::Config;
use crate::error::{
    AppError, AppResult, DispatchError, ProviderError, ProviderUnavailability, Unavailability,
};
use crate::metrics::{DispatchOutcome, Metrics};
use crate::providers::{
    BreakerSnapshot, ChatProvider, CircuitBreaker, CircuitState, LazyProvider, LocalModelLoader,
    OpenAiProvider, ProviderId, TextStream,
};
use crate::specialists::{RetryPolicy, SpecialistTask};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// Successful dispatch: the answer and the provider that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub text: String,
    pub provider: ProviderId,
}

/// Item of a streaming dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchChunk {
    /// Emitted once per provider, right before its first text
    Provider(ProviderId),
    Text(String),
}

/// Streaming dispatch output; an `Err` item is always the last item
pub type DispatchStream = BoxStream<'static, Result<DispatchChunk, DispatchError>>;

/// A cloud provider together with its breaker
struct CloudSlot {
    provider: Arc<dyn ChatProvider>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

/// The local model backstop (no breaker)
struct LocalSlot {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
}

/// Selects and invokes the best available provider for a specialist task
pub struct SpecialistResolver {
    primary: Option<CloudSlot>,
    secondary: Option<CloudSlot>,
    local: Option<LocalSlot>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

/// Builder for `SpecialistResolver`
pub struct SpecialistResolverBuilder {
    resolver: SpecialistResolver,
}

impl SpecialistResolverBuilder {
    /// Install cloud provider A
    pub fn primary(
        mut self,
        provider: Arc<dyn ChatProvider>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Self {
        self.resolver.primary = Some(CloudSlot {
            provider,
            breaker,
            timeout,
        });
        self
    }

    /// Install cloud provider B
    pub fn secondary(
        mut self,
        provider: Arc<dyn ChatProvider>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Self {
        self.resolver.secondary = Some(CloudSlot {
            provider,
            breaker,
            timeout,
        });
        self
    }

    /// Install the local model
    pub fn local(mut self, provider: Arc<dyn ChatProvider>, timeout: Duration) -> Self {
        self.resolver.local = Some(LocalSlot { provider, timeout });
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.resolver.retry = policy;
        self
    }

    pub fn build(self) -> SpecialistResolver {
        self.resolver
    }
}

impl SpecialistResolver {
    pub fn builder(metrics: Arc<Metrics>) -> SpecialistResolverBuilder {
        SpecialistResolverBuilder {
            resolver: SpecialistResolver {
                primary: None,
                secondary: None,
                local: None,
                retry: RetryPolicy::default(),
                metrics,
            },
        }
    }

    /// Build every configured provider slot from configuration
    ///
    /// Cloud providers get a breaker each. The local model is wrapped in a
    /// `LazyProvider`, so nothing is loaded until it is first needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when a cloud provider cannot be constructed
    /// (e.g. its API key variable is unset) or the retry settings are invalid.
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> AppResult<Self> {
        let retry = RetryPolicy::try_from(&config.retry)
            .map_err(|e| AppError::Config(format!("retry: {}", e)))?;
        let mut builder = Self::builder(metrics).retry(retry);

        for id in [ProviderId::Primary, ProviderId::Secondary] {
            let Some(endpoint) = config.providers.get(id) else {
                continue;
            };
            let provider = OpenAiProvider::from_endpoint(id, endpoint)
                .map_err(|e| AppError::Config(e.to_string()))?;
            let breaker = Arc::new(CircuitBreaker::new(id, config.breaker.settings()));
            let timeout = config.timeout_for(id);

            tracing::info!(
                provider = %id,
                model = %endpoint.name(),
                base_url = %endpoint.base_url(),
                timeout_seconds = timeout.as_secs(),
                "Configured cloud provider"
            );

            builder = match id {
                ProviderId::Primary => builder.primary(Arc::new(provider), breaker, timeout),
                _ => builder.secondary(Arc::new(provider), breaker, timeout),
            };
        }

        if let Some(endpoint) = &config.providers.local {
            let timeout = config.timeout_for(ProviderId::Local);
            let loader = LocalModelLoader::new(endpoint.clone(), timeout);
            let lazy = LazyProvider::new(ProviderId::Local, Box::new(loader));

            tracing::info!(
                model = %endpoint.name(),
                base_url = %endpoint.base_url(),
                "Configured local model (loaded on first use)"
            );

            builder = builder.local(Arc::new(lazy), timeout);
        }

        Ok(builder.build())
    }

    /// The provider installed in a slot, if any
    pub fn provider(&self, id: ProviderId) -> Option<Arc<dyn ChatProvider>> {
        match id {
            ProviderId::Primary | ProviderId::Secondary => {
                self.cloud_slot(id).map(|slot| slot.provider.clone())
            }
            ProviderId::Local => self.local.as_ref().map(|slot| slot.provider.clone()),
        }
    }

    /// The breaker guarding a cloud provider (the local model has none)
    pub fn breaker(&self, id: ProviderId) -> Option<&Arc<CircuitBreaker>> {
        self.cloud_slot(id).map(|slot| &slot.breaker)
    }

    /// Configured provider slots in priority order
    pub fn configured(&self) -> Vec<ProviderId> {
        ProviderId::PRIORITY
            .into_iter()
            .filter(|id| match id {
                ProviderId::Local => self.local.is_some(),
                _ => self.cloud_slot(*id).is_some(),
            })
            .collect()
    }

    /// Snapshot of every cloud breaker, in priority order
    pub async fn breaker_snapshots(&self) -> Vec<(ProviderId, BreakerSnapshot)> {
        let mut snapshots = Vec::new();
        for id in [ProviderId::Primary, ProviderId::Secondary] {
            if let Some(slot) = self.cloud_slot(id) {
                snapshots.push((id, slot.breaker.snapshot().await));
            }
        }
        snapshots
    }

    /// Administrative reset of one provider's breaker
    ///
    /// Returns false when the provider has no breaker.
    pub async fn reset_breaker(&self, id: ProviderId) -> bool {
        match self.cloud_slot(id) {
            Some(slot) => {
                slot.breaker.reset().await;
                self.metrics.breaker_transition(id, CircuitState::Closed);
                true
            }
            None => false,
        }
    }

    fn cloud_slot(&self, id: ProviderId) -> Option<&CloudSlot> {
        match id {
            ProviderId::Primary => self.primary.as_ref(),
            ProviderId::Secondary => self.secondary.as_ref(),
            ProviderId::Local => None,
        }
    }

    /// Execute a specialist task on the best available provider
    pub async fn execute(&self, task: &SpecialistTask) -> Result<Dispatched, DispatchError> {
        let request = task.to_request();
        let mut unavailable = Vec::new();

        for id in [ProviderId::Primary, ProviderId::Secondary] {
            let Some(slot) = self.cloud_slot(id) else {
                unavailable.push(ProviderUnavailability {
                    provider: id,
                    reason: Unavailability::NotConfigured,
                });
                continue;
            };

            if !self.admit(id, &slot.breaker).await {
                tracing::debug!(
                    provider = %id,
                    category = %task.category,
                    "Skipping provider, circuit breaker open"
                );
                self.metrics.record_dispatch(id, DispatchOutcome::Skipped);
                unavailable.push(ProviderUnavailability {
                    provider: id,
                    reason: Unavailability::BreakerOpen,
                });
                continue;
            }

            let timeout = task.timeout.unwrap_or(slot.timeout);
            let outcome = self
                .retry
                .run(id.as_str(), timeout, || slot.provider.complete(&request))
                .await
                .and_then(|text| usable(id, text));

            match outcome {
                Ok(text) => {
                    self.settle(id, &slot.breaker, Ok(())).await;
                    tracing::info!(
                        provider = %id,
                        category = %task.category,
                        response_length = text.len(),
                        "Specialist dispatch succeeded"
                    );
                    return Ok(Dispatched { text, provider: id });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %id,
                        category = %task.category,
                        error = %e,
                        error_kind = e.kind(),
                        "Provider failed, trying next provider"
                    );
                    unavailable.push(ProviderUnavailability {
                        provider: id,
                        reason: Unavailability::Failed(e.to_string()),
                    });
                    self.settle(id, &slot.breaker, Err(&e)).await;
                }
            }
        }

        let Some(local) = &self.local else {
            unavailable.push(ProviderUnavailability {
                provider: ProviderId::Local,
                reason: Unavailability::NotConfigured,
            });
            return Err(self.exhausted(task, unavailable));
        };

        let timeout = task.timeout.unwrap_or(local.timeout);
        let outcome = match tokio::time::timeout(timeout, local.provider.complete(&request)).await {
            Ok(result) => result.and_then(|text| usable(ProviderId::Local, text)),
            Err(_elapsed) => Err(ProviderError::Timeout {
                provider: ProviderId::Local.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(text) => {
                self.metrics
                    .record_dispatch(ProviderId::Local, DispatchOutcome::Success);
                tracing::info!(
                    provider = %ProviderId::Local,
                    category = %task.category,
                    response_length = text.len(),
                    "Specialist dispatch succeeded on local model"
                );
                Ok(Dispatched {
                    text,
                    provider: ProviderId::Local,
                })
            }
            Err(e) => {
                self.metrics
                    .record_dispatch(ProviderId::Local, DispatchOutcome::Failure);
                tracing::error!(
                    provider = %ProviderId::Local,
                    category = %task.category,
                    error = %e,
                    error_kind = e.kind(),
                    "Local model failed"
                );
                Err(DispatchError::LocalModel(e))
            }
        }
    }

    /// Streaming variant of [`execute`](Self::execute)
    pub fn execute_stream(self: Arc<Self>, task: SpecialistTask) -> DispatchStream {
        let stream = async_stream::stream! {
            let request = task.to_request();
            let mut unavailable = Vec::new();

            for id in [ProviderId::Primary, ProviderId::Secondary] {
                let Some(slot) = self.cloud_slot(id) else {
                    unavailable.push(ProviderUnavailability {
                        provider: id,
                        reason: Unavailability::NotConfigured,
                    });
                    continue;
                };

                if !self.admit(id, &slot.breaker).await {
                    self.metrics.record_dispatch(id, DispatchOutcome::Skipped);
                    unavailable.push(ProviderUnavailability {
                        provider: id,
                        reason: Unavailability::BreakerOpen,
                    });
                    continue;
                }

                let timeout = task.timeout.unwrap_or(slot.timeout);
                let opened = self
                    .retry
                    .run(id.as_str(), timeout, || slot.provider.stream(&request))
                    .await;
                let mut text_stream = match opened {
                    Ok(text_stream) => text_stream,
                    Err(e) => {
                        tracing::warn!(
                            provider = %id,
                            category = %task.category,
                            error = %e,
                            "Provider stream could not be opened, trying next provider"
                        );
                        unavailable.push(ProviderUnavailability {
                            provider: id,
                            reason: Unavailability::Failed(e.to_string()),
                        });
                        self.settle(id, &slot.breaker, Err(&e)).await;
                        continue;
                    }
                };

                let mut emitted = 0usize;
                let finished = loop {
                    match next_chunk(id, &mut text_stream, timeout, emitted).await {
                        Ok(Some(text)) => {
                            if emitted == 0 {
                                yield Ok(DispatchChunk::Provider(id));
                            }
                            emitted += text.len();
                            yield Ok(DispatchChunk::Text(text));
                        }
                        Ok(None) if emitted == 0 => break Err(empty_answer(id)),
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                };

                match finished {
                    Ok(()) => {
                        self.settle(id, &slot.breaker, Ok(())).await;
                        tracing::info!(
                            provider = %id,
                            category = %task.category,
                            bytes = emitted,
                            "Specialist stream completed"
                        );
                        return;
                    }
                    Err(e) => {
                        if emitted > 0 {
                            tracing::warn!(
                                provider = %id,
                                category = %task.category,
                                bytes_emitted = emitted,
                                error = %e,
                                "Provider stream failed after emitting text; \
                                 continuing on next provider (output is discontinuous)"
                            );
                        } else {
                            tracing::warn!(
                                provider = %id,
                                category = %task.category,
                                error = %e,
                                "Provider stream failed, trying next provider"
                            );
                        }
                        unavailable.push(ProviderUnavailability {
                            provider: id,
                            reason: Unavailability::Failed(e.to_string()),
                        });
                        self.settle(id, &slot.breaker, Err(&e)).await;
                    }
                }
            }

            let Some(local) = &self.local else {
                unavailable.push(ProviderUnavailability {
                    provider: ProviderId::Local,
                    reason: Unavailability::NotConfigured,
                });
                yield Err(self.exhausted(&task, unavailable));
                return;
            };

            let timeout = task.timeout.unwrap_or(local.timeout);
            let opened = match tokio::time::timeout(timeout, local.provider.stream(&request)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ProviderError::Timeout {
                    provider: ProviderId::Local.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            let mut text_stream = match opened {
                Ok(text_stream) => text_stream,
                Err(e) => {
                    self.metrics.record_dispatch(ProviderId::Local, DispatchOutcome::Failure);
                    tracing::error!(provider = %ProviderId::Local, error = %e, "Local model failed");
                    yield Err(DispatchError::LocalModel(e));
                    return;
                }
            };

            let mut emitted = 0usize;
            loop {
                match next_chunk(ProviderId::Local, &mut text_stream, timeout, emitted).await {
                    Ok(Some(text)) => {
                        if emitted == 0 {
                            yield Ok(DispatchChunk::Provider(ProviderId::Local));
                        }
                        emitted += text.len();
                        yield Ok(DispatchChunk::Text(text));
                    }
                    Ok(None) if emitted > 0 => {
                        self.metrics.record_dispatch(ProviderId::Local, DispatchOutcome::Success);
                        return;
                    }
                    Ok(None) => {
                        self.metrics.record_dispatch(ProviderId::Local, DispatchOutcome::Failure);
                        yield Err(DispatchError::LocalModel(empty_answer(ProviderId::Local)));
                        return;
                    }
                    Err(e) => {
                        self.metrics.record_dispatch(ProviderId::Local, DispatchOutcome::Failure);
                        tracing::error!(
                            provider = %ProviderId::Local,
                            bytes_emitted = emitted,
                            error = %e,
                            "Local model stream failed"
                        );
                        yield Err(DispatchError::LocalModel(e));
                        return;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    /// Ask the breaker for permission, counting an Open → HalfOpen transition
    async fn admit(&self, id: ProviderId, breaker: &CircuitBreaker) -> bool {
        let admission = breaker.admit().await;
        if let Some(state) = admission.transition {
            self.metrics.breaker_transition(id, state);
        }
        admission.permitted
    }

    /// Record the final outcome of one cloud dispatch attempt
    async fn settle(
        &self,
        id: ProviderId,
        breaker: &CircuitBreaker,
        outcome: Result<(), &ProviderError>,
    ) {
        let transition = match outcome {
            Ok(()) => {
                self.metrics.record_dispatch(id, DispatchOutcome::Success);
                breaker.record_success().await
            }
            Err(_) => {
                self.metrics.record_dispatch(id, DispatchOutcome::Failure);
                breaker.record_failure().await
            }
        };
        if let Some(state) = transition {
            self.metrics.breaker_transition(id, state);
        }
    }

    fn exhausted(
        &self,
        task: &SpecialistTask,
        unavailable: Vec<ProviderUnavailability>,
    ) -> DispatchError {
        let error = DispatchError::NoSpecialistAvailable {
            category: task.category,
            unavailable,
        };
        tracing::error!(category = %task.category, error = %error, "All providers exhausted");
        error
    }
}

/// Reject answers with no visible text
fn usable(id: ProviderId, text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(empty_answer(id))
    } else {
        Ok(text)
    }
}

fn empty_answer(id: ProviderId) -> ProviderError {
    ProviderError::MalformedResponse {
        provider: id.to_string(),
        message: "empty answer".to_string(),
    }
}

/// Next non-empty text chunk, bounded by an idle timeout
async fn next_chunk(
    id: ProviderId,
    stream: &mut TextStream,
    idle_timeout: Duration,
    emitted: usize,
) -> Result<Option<String>, ProviderError> {
    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(text))) if text.is_empty() => continue,
            Ok(Some(Ok(text))) => return Ok(Some(text)),
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Ok(None),
            Err(_elapsed) => {
                return Err(ProviderError::StreamInterrupted {
                    provider: id.to_string(),
                    bytes_received: emitted,
                    message: format!("no data for {}ms", idle_timeout.as_millis()),
                });
            }
        }
    }
}
