//! Database schema definitions for story sessions
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::memory::Role;

/// A persisted chat message. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub timestamp: DateTime<Utc>,
}

/// Cached summary of the oldest `messages_covered` messages of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCacheEntry {
    pub session_id: String,
    pub messages_covered: usize,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

/// Per-session usage accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub total_messages: i64,
    pub cached_summaries: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Database-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_summaries: i64,
    pub database_size_bytes: i64,
}

pub const SCHEMA_SQL: &str = "
-- Messages table: every message in full, append-only
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
    content TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    timestamp TEXT NOT NULL
);
-- Summaries table: one row per (session, coverage count)
CREATE TABLE IF NOT EXISTS summaries (
    session_id TEXT NOT NULL,
    messages_covered INTEGER NOT NULL CHECK (messages_covered >= 1),
    summary_text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, messages_covered)
);
CREATE INDEX IF NOT EXISTS idx_session_timestamp ON messages (session_id, timestamp, id);
CREATE INDEX IF NOT EXISTS idx_summary_session ON summaries (session_id, messages_covered DESC);
";
