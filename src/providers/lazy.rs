//! Construct-once provider cell
//!
//! The local model is expensive to bring up, so it is built on first use and
//! shared by every caller for the rest of the process. Concurrent first
//! callers wait on the same initialization instead of loading twice.
//!
//! A `LoadFailed` error is remembered: it is a configuration problem, and every
//! later call reports the same error without reloading. Any other load error
//! (the server is unreachable or still warming up) is returned to the caller
//! and the next call tries again.

use crate::config::ProviderEndpoint;
use crate::error::ProviderError;
use crate::providers::{ChatProvider, CompletionRequest, OpenAiProvider, ProviderId, TextStream};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Builds the provider held by a `LazyProvider`
///
/// Return `ProviderError::LoadFailed` only for errors that retrying cannot fix.
#[async_trait]
pub trait ProviderLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ChatProvider>, ProviderError>;
}

/// Provider that is constructed at most once, on first use
pub struct LazyProvider {
    id: ProviderId,
    loader: Box<dyn ProviderLoader>,
    cell: OnceCell<Result<Arc<dyn ChatProvider>, ProviderError>>,
}

impl LazyProvider {
    pub fn new(id: ProviderId, loader: Box<dyn ProviderLoader>) -> Self {
        Self {
            id,
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Get the shared provider, loading it if no load has stuck yet
    pub async fn get(&self) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let loaded = self
            .cell
            .get_or_try_init(|| async {
                tracing::info!(provider = %self.id, "Loading provider");
                match self.loader.load().await {
                    Ok(provider) => {
                        tracing::info!(provider = %self.id, "Provider loaded");
                        Ok(Ok(provider))
                    }
                    Err(e @ ProviderError::LoadFailed { .. }) => {
                        tracing::error!(
                            provider = %self.id,
                            error = %e,
                            "Provider failed to load. This is a configuration error; \
                             it will not be retried until restart."
                        );
                        Ok(Err(e))
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider = %self.id,
                            error = %e,
                            "Provider not reachable yet, will load again on next call"
                        );
                        Err(e)
                    }
                }
            })
            .await?;

        loaded.clone()
    }

    /// Whether a load has settled (a loaded provider or a configuration error)
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl ChatProvider for LazyProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.get().await?.complete(request).await
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream, ProviderError> {
        self.get().await?.stream(request).await
    }
}

/// Loads the local model server configured under `[providers.local]`
///
/// Loading builds the HTTP client and probes `GET {base_url}/models`. A bad
/// endpoint or missing API key fails the load for good; a probe that gets no
/// answer only fails the current call.
pub struct LocalModelLoader {
    endpoint: ProviderEndpoint,
    probe_timeout: Duration,
}

impl LocalModelLoader {
    pub fn new(endpoint: ProviderEndpoint, probe_timeout: Duration) -> Self {
        Self {
            endpoint,
            probe_timeout,
        }
    }
}

#[async_trait]
impl ProviderLoader for LocalModelLoader {
    async fn load(&self) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let provider = OpenAiProvider::from_endpoint(ProviderId::Local, &self.endpoint)?;
        provider.probe(self.probe_timeout).await.inspect_err(|e| {
            tracing::debug!(url = %provider.base_url(), error = %e, "Model probe failed");
        })?;
        Ok(Arc::new(provider))
    }
}
