// story-context/src/api/mod.rs
//! HTTP handlers for chat turns and session management

pub mod chat_api;
pub mod session_api;

pub use chat_api::{chat, chat_stream, ChatRequest, ChatResponse};
pub use session_api::{database_stats, delete_session, session_stats, session_summary};

use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::error;

use crate::metrics;
use crate::turn::TurnError;

pub const MAX_PROMPT_BYTES: usize = 65_536;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "code": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        let status = match &err {
            TurnError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            TurnError::Completion(_) => StatusCode::BAD_GATEWAY,
            TurnError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Turn failed: {}", err);
        }
        Self { status, message: err.to_string() }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Internal error: {}", err),
        }
    }
}

/// Counts the request under `route` with the status it ends with.
pub(crate) fn record<T>(route: &str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status,
    };
    metrics::inc_request(route, status.as_str());
}

pub(crate) fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if session_id.is_empty() {
        return Err(ApiError::bad_request("Session ID cannot be empty"));
    }
    if session_id.len() > 256 {
        return Err(ApiError::bad_request("Session ID too long (max 256 chars)"));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::bad_request("Session ID contains invalid characters"));
    }
    Ok(())
}

pub(crate) fn validate_prompt(prompt: &str) -> Result<(), ApiError> {
    if prompt.trim().is_empty() {
        return Err(ApiError::bad_request("Prompt cannot be empty"));
    }
    if prompt.len() > MAX_PROMPT_BYTES {
        return Err(ApiError::bad_request("Prompt exceeds 64KB limit"));
    }
    if prompt.contains('\0') {
        return Err(ApiError::bad_request("Prompt contains illegal null bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("default").is_ok());
        assert!(validate_session_id("story_42-b").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"a".repeat(257)).is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("héros").is_err());
    }

    #[test]
    fn test_validate_prompt() {
        assert!(validate_prompt("Tell me about the castle").is_ok());
        assert!(validate_prompt("   ").is_err());
        assert!(validate_prompt("a\0b").is_err());
        assert!(validate_prompt(&"a".repeat(MAX_PROMPT_BYTES + 1)).is_err());
    }

    #[test]
    fn test_turn_errors_map_to_statuses() {
        let limited: ApiError = TurnError::RateLimited { retry_after: Duration::from_millis(1500) }.into();
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.message, "Please wait 1.5 seconds before next request");

        let upstream: ApiError = TurnError::Completion(anyhow::anyhow!("boom")).into();
        assert_eq!(upstream.status, StatusCode::BAD_GATEWAY);

        let store: ApiError = TurnError::Store(anyhow::anyhow!("disk")).into();
        assert_eq!(store.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
