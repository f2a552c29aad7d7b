//! OpenAI-compatible chat completions provider
//!
//! Both cloud providers and the local model server speak the
//! `/v1/chat/completions` wire format, so one implementation backs all three
//! slots. HTTP status codes are mapped onto `ProviderError` variants so the
//! executor can tell rate limits apart from permanent failures.

use crate::config::ProviderEndpoint;
use crate::error::ProviderError;
use crate::providers::{ChatProvider, CompletionRequest, ProviderId, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// Maximum error body length kept in error messages
const MAX_ERROR_BODY: usize = 300;

/// Provider backed by an OpenAI-compatible HTTP API
#[derive(Clone)]
pub struct OpenAiProvider {
    id: ProviderId,
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    http: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl OpenAiProvider {
    /// Build a provider from its configuration entry
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`, if any. A missing variable is a configuration error.
    pub fn from_endpoint(id: ProviderId, endpoint: &ProviderEndpoint) -> Result<Self, ProviderError> {
        let api_key = match endpoint.api_key_env() {
            Some(var) => Some(std::env::var(var).map_err(|_| ProviderError::LoadFailed {
                provider: id.to_string(),
                message: format!("environment variable {} is not set", var),
            })?),
            None => None,
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::LoadFailed {
                provider: id.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            id,
            model: endpoint.name().to_string(),
            base_url: endpoint.base_url().trim_end_matches('/').to_string(),
            api_key,
            max_tokens: endpoint.max_tokens(),
            temperature: endpoint.temperature(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server answers `GET {base_url}/models`
    pub async fn probe(&self, timeout: std::time::Duration) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.http.get(&url).timeout(timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        tracing::debug!(
            provider = %self.id,
            url = %url,
            status = %status,
            "Provider probe completed"
        );
        if status.is_success() {
            Ok(())
        } else {
            Err(self.status_error(status.as_u16(), &response.text().await.unwrap_or_default()))
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatBody {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: request.temperature.unwrap_or(self.temperature),
            stream,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            prompt_length = request.prompt.len(),
            stream = stream,
            "Sending chat completion request"
        );

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.status_error(status.as_u16(), &body))
    }

    fn transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout {
                provider: self.id.to_string(),
                timeout_ms: 0,
            }
        } else {
            ProviderError::Transport {
                provider: self.id.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status (and its error body) to a `ProviderError`
    fn status_error(&self, status: u16, body: &str) -> ProviderError {
        let provider = self.id.to_string();
        let detail = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
        let message = detail
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| truncate(body, MAX_ERROR_BODY));

        let quota_exhausted = detail.as_ref().is_some_and(|d| {
            let code_matches = d
                .code
                .as_ref()
                .and_then(|c| c.as_str())
                .is_some_and(|c| c == "insufficient_quota");
            let kind_matches = d.kind.as_deref() == Some("insufficient_quota");
            code_matches || kind_matches
        });

        match status {
            429 if quota_exhausted => ProviderError::QuotaExhausted { provider, message },
            429 => ProviderError::RateLimited { provider, message },
            401 | 403 => ProviderError::Unauthorized { provider, status },
            402 => ProviderError::QuotaExhausted { provider, message },
            408 => ProviderError::Timeout {
                provider,
                timeout_ms: 0,
            },
            400..=499 => ProviderError::BadRequest {
                provider,
                status,
                message,
            },
            _ => ProviderError::Upstream {
                provider,
                status,
                message,
            },
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Result of decoding one server-sent-events line
#[derive(Debug, PartialEq)]
enum SseLine {
    Content(String),
    Done,
    Skip,
}

fn decode_sse_line(line: &str) -> Result<SseLine, String> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| e.to_string())?;
    let content = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect::<String>();

    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Content(content))
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let response = self.send(request, false).await?;
        let parsed: CompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    provider: self.id.to_string(),
                    message: e.to_string(),
                })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::MalformedResponse {
                provider: self.id.to_string(),
                message: "response contained no message content".to_string(),
            });
        }

        tracing::debug!(
            provider = %self.id,
            response_length = content.len(),
            "Chat completion received"
        );
        Ok(content)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream, ProviderError> {
        let response = self.send(request, true).await?;
        let provider = self.id.to_string();
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut received = 0usize;

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::StreamInterrupted {
                            provider: provider.clone(),
                            bytes_received: received,
                            message: e.to_string(),
                        });
                        return;
                    }
                };
                received += chunk.len();
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
                    match decode_sse_line(&line) {
                        Ok(SseLine::Content(text)) => yield Ok(text),
                        Ok(SseLine::Done) => return,
                        Ok(SseLine::Skip) => {}
                        Err(message) => {
                            yield Err(ProviderError::MalformedResponse {
                                provider: provider.clone(),
                                message,
                            });
                            return;
                        }
                    }
                }
            }

            // Servers that close the connection without a [DONE] marker
            // still get their last buffered line decoded.
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                match decode_sse_line(&line) {
                    Ok(SseLine::Content(text)) => yield Ok(text),
                    Ok(_) => {}
                    Err(message) => {
                        yield Err(ProviderError::MalformedResponse {
                            provider: provider.clone(),
                            message,
                        });
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        let endpoint: ProviderEndpoint = toml::from_str(
            r#"
name = "test-model"
base_url = "http://localhost:1234/v1"
"#,
        )
        .expect("endpoint should parse");
        OpenAiProvider::from_endpoint(ProviderId::Primary, &endpoint).expect("provider builds")
    }

    #[test]
    fn test_decode_sse_content_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            decode_sse_line(line).unwrap(),
            SseLine::Content("Hel".to_string())
        );
    }

    #[test]
    fn test_decode_sse_done_and_comments() {
        assert_eq!(decode_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(decode_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(decode_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(
            decode_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
    }

    #[test]
    fn test_decode_sse_rejects_garbage() {
        assert!(decode_sse_line("data: {not json").is_err());
    }

    #[test]
    fn test_status_mapping() {
        let p = provider();
        assert!(matches!(
            p.status_error(429, r#"{"error":{"message":"slow down"}}"#),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            p.status_error(
                429,
                r#"{"error":{"message":"billing","code":"insufficient_quota"}}"#
            ),
            ProviderError::QuotaExhausted { .. }
        ));
        assert!(matches!(
            p.status_error(401, ""),
            ProviderError::Unauthorized { status: 401, .. }
        ));
        assert!(matches!(
            p.status_error(402, ""),
            ProviderError::QuotaExhausted { .. }
        ));
        assert!(matches!(
            p.status_error(422, "bad"),
            ProviderError::BadRequest { status: 422, .. }
        ));
        assert!(matches!(
            p.status_error(503, "down"),
            ProviderError::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn test_error_message_prefers_json_message() {
        let p = provider();
        let err = p.status_error(400, r#"{"error":{"message":"model not found"}}"#);
        assert!(err.to_string().contains("model not found"), "got: {}", err);
    }

    #[test]
    fn test_missing_api_key_env_is_load_failure() {
        let endpoint: ProviderEndpoint = toml::from_str(
            r#"
name = "test-model"
base_url = "https://api.example.com/v1"
api_key_env = "SWITCHBOARD_TEST_KEY_THAT_IS_NEVER_SET"
"#,
        )
        .expect("endpoint should parse");
        let err = OpenAiProvider::from_endpoint(ProviderId::Secondary, &endpoint).unwrap_err();
        assert!(matches!(err, ProviderError::LoadFailed { .. }));
    }

    #[test]
    fn test_debug_output_hides_api_key() {
        let mut provider = provider();
        provider.api_key = Some("sk-live-secret".to_string());

        let debug = format!("{:?}", provider);

        assert!(!debug.contains("sk-live-secret"), "{}", debug);
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("localhost:1234"));
    }
}
