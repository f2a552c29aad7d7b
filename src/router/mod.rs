//! Request classification for Switchboard
//!
//! Maps a free-text message to one of six task categories. The category
//! decides which specialist prompt is used; confidence and reasoning are
//! observability metadata only.

pub mod classifier;

pub use classifier::{Classifier, LlmClassifier};

use serde::{Deserialize, Serialize};

/// Task category a request can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    CodeValidation,
    KnowledgeQuery,
    CodeGeneration,
    CodeAnalysis,
    ComplexReasoning,
    GeneralChat,
}

impl Category {
    /// All categories, in the order they are presented to the classifier
    pub const ALL: [Category; 6] = [
        Category::CodeValidation,
        Category::KnowledgeQuery,
        Category::CodeGeneration,
        Category::CodeAnalysis,
        Category::ComplexReasoning,
        Category::GeneralChat,
    ];

    /// Wire name used in classifier output, logs and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeValidation => "code_validation",
            Self::KnowledgeQuery => "knowledge_query",
            Self::CodeGeneration => "code_generation",
            Self::CodeAnalysis => "code_analysis",
            Self::ComplexReasoning => "complex_reasoning",
            Self::GeneralChat => "general_chat",
        }
    }

    /// Parse a category name produced by an untrusted model
    ///
    /// Case, surrounding whitespace and `-`/space separators are tolerated.
    /// Returns `None` for anything that is not one of the six categories.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one message
///
/// Immutable once built. `primary` is always one of the six categories;
/// unknown model output has already been coerced to `GeneralChat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    primary: Category,
    parallel: Vec<Category>,
    confidence: f64,
    reasoning: String,
}

impl RoutingDecision {
    /// Build a decision, clamping confidence into [0.0, 1.0]
    ///
    /// `parallel` is reduced to an ordered set: duplicates and the primary
    /// category are dropped, first occurrence wins. NaN confidence becomes 0.0.
    pub fn new(
        primary: Category,
        parallel: Vec<Category>,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        let mut ordered = Vec::with_capacity(parallel.len());
        for category in parallel {
            if category != primary && !ordered.contains(&category) {
                ordered.push(category);
            }
        }

        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            primary,
            parallel: ordered,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    /// Degraded decision used whenever classification fails
    pub fn fallback(cause: impl std::fmt::Display) -> Self {
        Self::new(
            Category::GeneralChat,
            Vec::new(),
            0.5,
            format!("routing failed: {}", cause),
        )
    }

    pub fn primary(&self) -> Category {
        self.primary
    }

    pub fn parallel(&self) -> &[Category] {
        &self.parallel
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
}
