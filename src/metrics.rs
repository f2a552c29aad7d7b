//! Prometheus metrics collection for Switchboard
//!
//! Tracks:
//! - Requests by classified category
//! - Dispatch outcomes per provider
//! - Cross-category fallbacks and apology responses
//! - Classification failures
//! - Circuit breaker transitions
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Recording never fails a request.

use crate::providers::{CircuitState, ProviderId};
use crate::router::Category;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome of one provider dispatch, for metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure,
    /// Skipped because the provider's breaker was open
    Skipped,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

/// Which fallback tier was used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStage {
    /// Original category failed, general chat was dispatched instead
    Category,
    /// General chat also failed, the fixed apology was returned
    Apology,
}

impl FallbackStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Apology => "apology",
        }
    }
}

/// Metrics collector for Switchboard
///
/// Owns its own registry; nothing is registered globally.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    dispatch_total: IntCounterVec,
    fallbacks_total: IntCounterVec,
    classification_failures: IntCounter,
    breaker_transitions: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 6 categories
        let requests_total = IntCounterVec::new(
            Opts::new(
                "switchboard_requests_total",
                "Total chat requests by classified category",
            ),
            &["category"],
        )?;

        // Cardinality: 3 providers × 3 outcomes
        let dispatch_total = IntCounterVec::new(
            Opts::new(
                "switchboard_dispatch_total",
                "Provider dispatch attempts by provider and outcome (success, failure, skipped)",
            ),
            &["provider", "outcome"],
        )?;

        let fallbacks_total = IntCounterVec::new(
            Opts::new(
                "switchboard_fallbacks_total",
                "Requests served by a fallback tier (category = general chat fallback, \
                apology = fixed apology text)",
            ),
            &["stage"],
        )?;

        let classification_failures = IntCounter::new(
            "switchboard_classification_failures_total",
            "Classifier calls that failed and were defaulted to general chat",
        )?;

        // Cardinality: 2 cloud providers × 3 states
        let breaker_transitions = IntCounterVec::new(
            Opts::new(
                "switchboard_breaker_transitions_total",
                "Circuit breaker state transitions by provider and target state",
            ),
            &["provider", "to"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(dispatch_total.clone()))?;
        registry.register(Box::new(fallbacks_total.clone()))?;
        registry.register(Box::new(classification_failures.clone()))?;
        registry.register(Box::new(breaker_transitions.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            dispatch_total,
            fallbacks_total,
            classification_failures,
            breaker_transitions,
        })
    }

    pub fn record_request(&self, category: Category) {
        self.requests_total
            .with_label_values(&[category.as_str()])
            .inc();
    }

    pub fn record_dispatch(&self, provider: ProviderId, outcome: DispatchOutcome) {
        self.dispatch_total
            .with_label_values(&[provider.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn record_fallback(&self, stage: FallbackStage) {
        self.fallbacks_total
            .with_label_values(&[stage.as_str()])
            .inc();
    }

    pub fn classification_failure(&self) {
        self.classification_failures.inc();
    }

    pub fn breaker_transition(&self, provider: ProviderId, to: CircuitState) {
        self.breaker_transitions
            .with_label_values(&[provider.as_str(), to.as_str()])
            .inc();
    }

    pub fn transition_count(&self, provider: ProviderId, to: CircuitState) -> u64 {
        self.breaker_transitions
            .with_label_values(&[provider.as_str(), to.as_str()])
            .get()
    }

    pub fn dispatch_count(&self, provider: ProviderId, outcome: DispatchOutcome) -> u64 {
        self.dispatch_total
            .with_label_values(&[provider.as_str(), outcome.as_str()])
            .get()
    }

    pub fn fallback_count(&self, stage: FallbackStage) -> u64 {
        self.fallbacks_total
            .with_label_values(&[stage.as_str()])
            .get()
    }

    pub fn classification_failures_count(&self) -> u64 {
        self.classification_failures.get()
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;

        String::from_utf8(buffer).map_err(|e| format!("Metrics are not valid UTF-8: {}", e))
    }
}
