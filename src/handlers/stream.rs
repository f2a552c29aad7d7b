//! Streaming chat handler
//!
//! Handles POST /chat/stream and returns Server-Sent Events:
//!
//! ```text
//! event: routing
//! data: {"type":"routing","data":{"category":"code_generation","provider":"primary","confidence":0.9}}
//!
//! event: content
//! data: {"type":"content","data":"fn main() {"}
//!
//! event: done
//! data: {"type":"done"}
//! ```

use crate::coordinator::ChatEvent;
use crate::error::AppResult;
use crate::handlers::AppState;
use crate::handlers::chat::ChatBody;
use crate::middleware::RequestId;
use axum::{
    Extension, Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;

pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<ChatBody>,
) -> AppResult<Response> {
    let request = body.into_request(state.config().chat.max_message_chars, request_id)?;

    tracing::info!(
        request_id = %request_id,
        message_length = request.message.len(),
        "Starting streaming chat response"
    );

    let events = state
        .coordinator()
        .clone()
        .chat_stream(request)
        .map(move |event| {
            if event.is_terminal() {
                tracing::debug!(request_id = %request_id, event = event.name(), "Stream finished");
            }
            Ok::<_, Infallible>(to_sse(&event))
        });

    Ok(Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response())
}

/// Render one chat event as an SSE frame
pub fn to_sse(event: &ChatEvent) -> Event {
    let frame = Event::default().event(event.name());
    match frame.clone().json_data(event) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, event = event.name(), "Failed to encode chat event");
            frame.data(r#"{"type":"error","data":"encoding failure"}"#)
        }
    }
}
