use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::api::{record, validate_session_id, ApiError};
use crate::memory_db::{DatabaseStats, SessionStats};
use crate::shared_state::UnifiedAppState;

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub session_id: String,
    pub summary: String,
    pub messages_covered: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub messages_deleted: usize,
}

/// GET /api/sessions/:id/stats
pub async fn session_stats(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    let result = validate_session_id(&session_id)
        .and_then(|_| state.database.session_stats(&session_id).map_err(ApiError::from));
    record("/api/sessions/stats", &result);
    result.map(Json)
}

/// GET /api/stats
pub async fn database_stats(
    State(state): State<UnifiedAppState>,
) -> Result<Json<DatabaseStats>, ApiError> {
    let result = state.database.get_stats().map_err(ApiError::from);
    record("/api/stats", &result);
    result.map(Json)
}

/// GET /api/sessions/:id/summary
///
/// Builds the summary of everything older than the recent window if it is
/// not cached yet.
pub async fn session_summary(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let result = async {
        validate_session_id(&session_id)?;
        let (summary, messages_covered) = state.orchestrator.get_or_build_summary(&session_id).await?;
        Ok::<_, ApiError>(SummaryResponse { session_id: session_id.clone(), summary, messages_covered })
    }
    .await;
    record("/api/sessions/summary", &result);
    result.map(Json)
}

/// DELETE /api/sessions/:id
pub async fn delete_session(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let result = validate_session_id(&session_id).and_then(|_| {
        let messages_deleted = state.database.delete_session(&session_id)?;
        info!("Session {} deleted", session_id);
        Ok(DeleteResponse { success: true, messages_deleted })
    });
    record("/api/sessions/delete", &result);
    result.map(Json)
}
