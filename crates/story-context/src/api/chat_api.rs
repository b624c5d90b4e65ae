//! Chat endpoints: one story turn, blocking or streamed over SSE.

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{error, info};

use crate::api::{record, validate_prompt, validate_session_id, ApiError};
use crate::completion::Usage;
use crate::shared_state::UnifiedAppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub session_id: String,
    pub usage: Usage,
}

/// POST /api/chat
pub async fn chat(
    State(state): State<UnifiedAppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let result = run_chat(&state, req).await;
    record("/api/chat", &result);
    result.map(Json)
}

async fn run_chat(state: &UnifiedAppState, req: ChatRequest) -> Result<ChatResponse, ApiError> {
    validate_session_id(&req.session_id)?;
    validate_prompt(&req.prompt)?;
    info!("Chat request for session {}", req.session_id);

    let outcome = state.turns.run_turn(&req.session_id, &req.prompt).await?;
    Ok(ChatResponse {
        reply: outcome.reply,
        session_id: req.session_id,
        usage: outcome.usage,
    })
}

/// POST /api/chat/stream
///
/// Emits `{"delta": "..."}` events followed by `[DONE]`. A failure after
/// the stream has started is reported as a final `{"error": "..."}` event.
pub async fn chat_stream(
    State(state): State<UnifiedAppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let result = start_stream(&state, req).await;
    record("/api/chat/stream", &result);
    result
}

async fn start_stream(state: &UnifiedAppState, req: ChatRequest) -> Result<Response, ApiError> {
    validate_session_id(&req.session_id)?;
    validate_prompt(&req.prompt)?;
    info!("Streaming chat request for session {}", req.session_id);

    let mut deltas = state.turns.stream_turn(&req.session_id, &req.prompt).await?;

    let events = async_stream::stream! {
        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) => {
                    yield Ok::<_, Infallible>(Event::default().data(json!({ "delta": delta }).to_string()));
                }
                Err(e) => {
                    error!("Stream error: {}", e);
                    yield Ok(Event::default().data(json!({ "error": e.to_string() }).to_string()));
                    return;
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}
