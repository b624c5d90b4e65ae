use crate::memory::Role;
use crate::memory_db::schema::*;
use crate::memory_db::MessageLog;
use rusqlite::{params, Connection, Row};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// A message about to be appended.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub role: Role,
    pub content: &'a str,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Token totals for one session, as recorded on its messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub messages: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, input_tokens, output_tokens, timestamp";

/// SQLite-backed append-only message log.
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Fixed-width timestamps keep lexical and chronological order identical.
    fn now_timestamp() -> (DateTime<Utc>, String) {
        let now = Utc::now();
        let text = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        (now, text)
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
        let role: String = row.get(2)?;
        let timestamp = Self::parse_datetime_safe(&row.get::<_, String>(6)?)
            .unwrap_or_else(|| { warn!("Failed parse message timestamp"); Utc::now() });

        Ok(StoredMessage {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: role.parse()?,
            content: row.get(3)?,
            input_tokens: row.get(4)?,
            output_tokens: row.get(5)?,
            timestamp,
        })
    }

    fn query_messages(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_stored_message(row)?);
        }
        Ok(messages)
    }

    /// Every message of a session, oldest first.
    pub fn get_session_messages(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS
            ),
            [session_id],
        )
    }

    pub fn usage_totals(&self, session_id: &str) -> anyhow::Result<UsageTotals> {
        let conn = self.get_conn()?;
        let totals = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM messages WHERE session_id = ?1",
            [session_id],
            |row| Ok(UsageTotals {
                messages: row.get(0)?,
                input_tokens: row.get(1)?,
                output_tokens: row.get(2)?,
            }),
        )?;
        Ok(totals)
    }

    /// Runs on the caller's connection so it can share a transaction.
    pub fn delete_session(conn: &Connection, session_id: &str) -> anyhow::Result<usize> {
        let deleted = conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        info!("Deleted {} messages for session {}", deleted, session_id);
        Ok(deleted)
    }
}

impl MessageLog for ConversationStore {
    fn count(&self, session_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn last_n(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<StoredMessage>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut messages = self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE session_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2",
                MESSAGE_COLUMNS
            ),
            params![session_id, n as i64],
        )?;
        messages.reverse();
        Ok(messages)
    }

    fn range(&self, session_id: &str, start: usize, end: usize) -> anyhow::Result<Vec<StoredMessage>> {
        if start == 0 || end < start {
            return Ok(Vec::new());
        }
        self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE session_id = ?1
                 ORDER BY timestamp ASC, id ASC LIMIT ?2 OFFSET ?3",
                MESSAGE_COLUMNS
            ),
            params![session_id, (end - start + 1) as i64, (start - 1) as i64],
        )
    }

    fn append(&self, session_id: &str, message: NewMessage<'_>) -> anyhow::Result<StoredMessage> {
        let mut stored = self.append_batch(session_id, &[message])?;
        stored.pop().ok_or_else(|| anyhow::anyhow!("Append produced no row"))
    }

    fn append_batch(
        &self,
        session_id: &str,
        messages: &[NewMessage<'_>],
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let mut conn = self.get_conn()?;
        let (now, now_str) = Self::now_timestamp();
        let mut stored_messages = Vec::with_capacity(messages.len());

        let tx = conn.transaction()?;
        for message in messages {
            tx.execute(
                "INSERT INTO messages
                 (session_id, role, content, input_tokens, output_tokens, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    message.role.as_str(),
                    message.content,
                    message.input_tokens,
                    message.output_tokens,
                    &now_str,
                ],
            )?;
            stored_messages.push(StoredMessage {
                id: tx.last_insert_rowid(),
                session_id: session_id.to_string(),
                role: message.role,
                content: message.content.to_string(),
                input_tokens: message.input_tokens,
                output_tokens: message.output_tokens,
                timestamp: now,
            });
        }
        tx.commit()?;

        debug!("Stored {} messages for session {}", messages.len(), session_id);
        Ok(stored_messages)
    }
}
