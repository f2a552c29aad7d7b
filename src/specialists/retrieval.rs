//! Retrieval capability used by the knowledge-query specialist

use crate::error::RetrievalError;
use async_trait::async_trait;

/// Result of a knowledge lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retrieved {
    /// Answer or snippets found for the query, used as specialist context
    pub answer: String,
    /// Source references, rendered as a footer on the final answer
    pub citations: Vec<String>,
}

impl Retrieved {
    /// `Sources:` footer for the citations, or `None` when there are none
    pub fn sources_footer(&self) -> Option<String> {
        let citations: Vec<&str> = self
            .citations
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if citations.is_empty() {
            return None;
        }

        let mut footer = String::from("\n\nSources:");
        for citation in citations {
            footer.push_str("\n- ");
            footer.push_str(citation);
        }
        Some(footer)
    }

    /// Merge the retrieved answer into caller-supplied context
    pub fn merge_into(&self, context: Option<&str>) -> Option<String> {
        let answer = self.answer.trim();
        match (context.map(str::trim).filter(|c| !c.is_empty()), answer.is_empty()) {
            (Some(context), false) => Some(format!("{}\n\n{}", context, answer)),
            (Some(context), true) => Some(context.to_string()),
            (None, false) => Some(answer.to_string()),
            (None, true) => None,
        }
    }
}

/// Knowledge lookup (query in, answer and citations out)
///
/// Implemented by the integrating application. Failures are logged by the
/// coordinator and dispatch continues without retrieved context.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Retrieved, RetrievalError>;
}
