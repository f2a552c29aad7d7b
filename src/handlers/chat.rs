//! Chat endpoint handler
//!
//! Handles POST /chat: classify, dispatch, and return the answer with its
//! routing metadata. Dispatch never fails, so the only error responses are
//! validation errors.

use crate::config::MAX_TIMEOUT_SECONDS;
use crate::coordinator::{ChatOutcome, ChatRequest};
use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::router::Category;
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat request body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    /// Per-request bound for each provider call
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ChatBody {
    /// Validate against the configured limits and convert to a `ChatRequest`
    ///
    /// A missing `session_id` falls back to the request ID.
    pub fn into_request(
        self,
        max_message_chars: usize,
        request_id: RequestId,
    ) -> AppResult<ChatRequest> {
        if self.message.trim().is_empty() {
            return Err(AppError::Validation(
                "message cannot be empty or contain only whitespace".to_string(),
            ));
        }

        // Count Unicode characters, not bytes
        let char_count = self.message.chars().count();
        if char_count > max_message_chars {
            return Err(AppError::Validation(format!(
                "message exceeds maximum length of {} characters (got {})",
                max_message_chars, char_count
            )));
        }

        if let Some(seconds) = self.timeout_seconds
            && (seconds == 0 || seconds > MAX_TIMEOUT_SECONDS)
        {
            return Err(AppError::Validation(format!(
                "timeout_seconds must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECONDS, seconds
            )));
        }

        Ok(ChatRequest {
            message: self.message,
            user_id: self.user_id.unwrap_or_else(|| "anonymous".to_string()),
            session_id: self.session_id.unwrap_or_else(|| request_id.to_string()),
            context: self.context,
            timeout: self.timeout_seconds.map(Duration::from_secs),
        })
    }
}

/// Chat response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    pub provider: String,
    pub category: Category,
    pub fellback: bool,
    pub confidence: f64,
}

impl From<ChatOutcome> for ChatReply {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            text: outcome.result.text,
            provider: outcome.result.provider_used,
            category: outcome.result.category,
            fellback: outcome.result.fellback,
            confidence: outcome.decision.confidence(),
        }
    }
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<ChatBody>,
) -> AppResult<Json<ChatReply>> {
    let request = body.into_request(state.config().chat.max_message_chars, request_id)?;

    tracing::debug!(
        request_id = %request_id,
        message_length = request.message.len(),
        has_context = request.context.is_some(),
        "Received chat request"
    );

    let outcome = state.coordinator().dispatch(request).await;

    tracing::info!(
        request_id = %request_id,
        category = %outcome.result.category,
        provider = %outcome.result.provider_used,
        fellback = outcome.result.fellback,
        confidence = outcome.decision.confidence(),
        "Chat request completed"
    );

    Ok(Json(ChatReply::from(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(message: &str) -> ChatBody {
        ChatBody {
            message: message.to_string(),
            user_id: None,
            session_id: None,
            context: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_rejects_blank_message() {
        let err = body("   ").into_request(100, RequestId::new()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_rejects_message_over_limit_counting_chars() {
        // 4 chars, 8 bytes
        assert!(body("éééé").into_request(4, RequestId::new()).is_ok());
        let err = body("ééééé").into_request(4, RequestId::new()).unwrap_err();
        assert!(err.to_string().contains("maximum length of 4"), "{}", err);
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let mut b = body("hi");
        b.timeout_seconds = Some(0);
        assert!(b.into_request(100, RequestId::new()).is_err());

        let mut b = body("hi");
        b.timeout_seconds = Some(301);
        assert!(b.into_request(100, RequestId::new()).is_err());
    }

    #[test]
    fn test_defaults_identity_fields() {
        let request_id = RequestId::new();
        let request = body("hi").into_request(100, request_id).unwrap();
        assert_eq!(request.user_id, "anonymous");
        assert_eq!(request.session_id, request_id.to_string());
        assert_eq!(request.timeout, None);
    }

    #[test]
    fn test_deserializes_minimal_body() {
        let parsed: ChatBody = serde_json::from_str(r#"{"message": "hello"}"#).unwrap();
        assert_eq!(parsed.message, "hello");
        assert!(parsed.context.is_none());
    }
}
