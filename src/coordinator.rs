//! Single entry point combining classification and dispatch
//!
//! `dispatch` never fails. The specialist for the classified category is tried
//! first; if it produces no answer the message is re-dispatched to general
//! chat; if that fails too, the fixed [`APOLOGY`] is returned. Failures reach
//! operators through logs and metrics only.

use crate::error::RetrievalError;
use crate::metrics::{FallbackStage, Metrics};
use crate::providers::ProviderId;
use crate::router::{Category, Classifier, RoutingDecision};
use crate::specialists::{DispatchChunk, Retrieved, Retriever, SpecialistResolver, SpecialistTask};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Answer returned when every fallback tier failed
pub const APOLOGY: &str = "I'm sorry, I wasn't able to process your request right now. \
Please try again in a moment.";

/// `provider_used` value for the apology answer
pub const NO_PROVIDER: &str = "none";

/// Default bound for a knowledge retrieval call
pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// An inbound chat message (already validated by the caller)
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
    /// Optional reference material a specialist may prepend to its prompt
    pub context: Option<String>,
    /// Overrides the configured per-provider call timeouts
    pub timeout: Option<Duration>,
}

impl ChatRequest {
    pub fn new(
        message: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            context: None,
            timeout: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Final answer of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub text: String,
    /// Provider that produced `text`, or [`NO_PROVIDER`] for the apology
    pub provider_used: String,
    /// Category whose specialist produced `text`
    pub category: Category,
    /// True when the classified category's specialist did not produce the answer
    pub fellback: bool,
}

/// Routing decision together with the answer it led to
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub decision: RoutingDecision,
    pub result: DispatchResult,
}

/// Streaming chat event
///
/// Order: at most one `Routing`, any number of `Content`, then exactly one
/// `Done` or `Error`. Concatenating the `Content` payloads gives the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    Routing {
        category: Category,
        provider: ProviderId,
        confidence: f64,
    },
    Content(String),
    Done,
    Error(String),
}

impl ChatEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Routing { .. } => "routing",
            Self::Content(_) => "content",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// Classifies and dispatches chat messages
pub struct Coordinator {
    classifier: Arc<dyn Classifier>,
    resolver: Arc<SpecialistResolver>,
    retriever: Option<Arc<dyn Retriever>>,
    retrieval_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        resolver: Arc<SpecialistResolver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            classifier,
            resolver,
            retriever: None,
            retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
            metrics,
        }
    }

    /// Install the knowledge retriever used for `KnowledgeQuery` messages
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, timeout: Duration) -> Self {
        self.retriever = Some(retriever);
        self.retrieval_timeout = timeout;
        self
    }

    pub fn resolver(&self) -> &Arc<SpecialistResolver> {
        &self.resolver
    }

    /// Answer a message; never fails
    pub async fn chat(&self, request: ChatRequest) -> String {
        self.dispatch(request).await.result.text
    }

    /// Answer a message and report how it was routed; never fails
    pub async fn dispatch(&self, request: ChatRequest) -> ChatOutcome {
        let span = tracing::info_span!(
            "chat",
            user_id = %request.user_id,
            session_id = %request.session_id
        );
        self.dispatch_inner(request).instrument(span).await
    }

    async fn dispatch_inner(&self, request: ChatRequest) -> ChatOutcome {
        let decision = self.classifier.route(&request.message).await;
        let category = decision.primary();
        self.metrics.record_request(category);

        let (task, retrieved) = self.prepare(&decision, &request).await;
        match self.resolver.execute(&task).await {
            Ok(dispatched) => {
                let mut text = dispatched.text;
                if let Some(footer) = retrieved.as_ref().and_then(Retrieved::sources_footer) {
                    text.push_str(&footer);
                }
                return ChatOutcome {
                    decision,
                    result: DispatchResult {
                        text,
                        provider_used: dispatched.provider.to_string(),
                        category,
                        fellback: false,
                    },
                };
            }
            Err(e) => {
                tracing::warn!(
                    category = %category,
                    error = %e,
                    "Specialist dispatch failed, falling back to general chat"
                );
            }
        }

        self.metrics.record_fallback(FallbackStage::Category);
        let fallback = fallback_task(&request);
        let result = match self.resolver.execute(&fallback).await {
            Ok(dispatched) => DispatchResult {
                text: dispatched.text,
                provider_used: dispatched.provider.to_string(),
                category: Category::GeneralChat,
                fellback: true,
            },
            Err(e) => {
                tracing::error!(
                    category = %category,
                    error = %e,
                    "General chat fallback failed, returning apology"
                );
                self.metrics.record_fallback(FallbackStage::Apology);
                apology()
            }
        };

        ChatOutcome { decision, result }
    }

    /// Answer a message as a stream of events; never fails
    ///
    /// Falls back exactly like [`dispatch`](Self::dispatch) while nothing has
    /// been emitted. Once content has been emitted a failure ends the stream
    /// with an `Error` event instead.
    pub fn chat_stream(self: Arc<Self>, request: ChatRequest) -> BoxStream<'static, ChatEvent> {
        let span = tracing::info_span!(
            "chat_stream",
            user_id = %request.user_id,
            session_id = %request.session_id
        );

        let events = async_stream::stream! {
            let decision = self
                .classifier
                .route(&request.message)
                .instrument(span.clone())
                .await;
            let category = decision.primary();
            self.metrics.record_request(category);

            let (task, retrieved) = self
                .prepare(&decision, &request)
                .instrument(span.clone())
                .await;
            let footer = retrieved.as_ref().and_then(Retrieved::sources_footer);
            let tiers = [(task, footer), (fallback_task(&request), None)];

            let mut routed = false;
            let mut emitted = false;

            for (tier, (task, footer)) in tiers.into_iter().enumerate() {
                if tier > 0 {
                    self.metrics.record_fallback(FallbackStage::Category);
                }
                let tier_category = task.category;

                let mut chunks = self.resolver.clone().execute_stream(task);
                let mut failure = None;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(DispatchChunk::Provider(provider)) => {
                            if !routed {
                                routed = true;
                                yield ChatEvent::Routing {
                                    category: tier_category,
                                    provider,
                                    confidence: decision.confidence(),
                                };
                            }
                        }
                        Ok(DispatchChunk::Text(text)) => {
                            emitted = true;
                            yield ChatEvent::Content(text);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                match failure {
                    None => {
                        if let Some(footer) = footer {
                            yield ChatEvent::Content(footer);
                        }
                        yield ChatEvent::Done;
                        return;
                    }
                    Some(e) if emitted => {
                        tracing::error!(
                            parent: &span,
                            category = %tier_category,
                            error = %e,
                            "Stream failed after content was emitted"
                        );
                        yield ChatEvent::Error(
                            "The response was interrupted. Please try again.".to_string(),
                        );
                        return;
                    }
                    Some(e) => {
                        tracing::warn!(
                            parent: &span,
                            category = %tier_category,
                            error = %e,
                            "Streaming dispatch failed before any content"
                        );
                    }
                }
            }

            tracing::error!(parent: &span, "General chat fallback failed, returning apology");
            self.metrics.record_fallback(FallbackStage::Apology);
            yield ChatEvent::Content(APOLOGY.to_string());
            yield ChatEvent::Done;
        };

        Box::pin(events)
    }

    /// Build the specialist task, consulting the retriever for knowledge queries
    async fn prepare(
        &self,
        decision: &RoutingDecision,
        request: &ChatRequest,
    ) -> (SpecialistTask, Option<Retrieved>) {
        let category = decision.primary();
        let mut context = request.context.clone();
        let mut retrieved = None;

        if category == Category::KnowledgeQuery
            && let Some(retriever) = &self.retriever
        {
            let outcome =
                tokio::time::timeout(self.retrieval_timeout, retriever.retrieve(&request.message))
                    .await
                    .unwrap_or_else(|_elapsed| {
                        Err(RetrievalError::Timeout {
                            timeout_ms: self.retrieval_timeout.as_millis() as u64,
                        })
                    });
            match outcome {
                Ok(found) => {
                    tracing::debug!(
                        citations = found.citations.len(),
                        answer_length = found.answer.len(),
                        "Retrieved knowledge context"
                    );
                    context = found.merge_into(context.as_deref());
                    retrieved = Some(found);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Retrieval failed, continuing without it");
                }
            }
        }

        let task = SpecialistTask::new(category, request.message.clone())
            .with_context(context)
            .with_perspectives(decision.parallel())
            .with_timeout(request.timeout);
        (task, retrieved)
    }
}

fn fallback_task(request: &ChatRequest) -> SpecialistTask {
    SpecialistTask::new(Category::GeneralChat, request.message.clone())
        .with_context(request.context.clone())
        .with_timeout(request.timeout)
}

fn apology() -> DispatchResult {
    DispatchResult {
        text: APOLOGY.to_string(),
        provider_used: NO_PROVIDER.to_string(),
        category: Category::GeneralChat,
        fellback: true,
    }
}
