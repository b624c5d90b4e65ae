//! Summary cache storage: `(session_id, messages_covered) -> summary_text`
use crate::memory_db::schema::*;
use crate::memory_db::SummaryCache;
use rusqlite::{params, Connection, OptionalExtension, Row};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub struct SummaryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SummaryStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<(String, i64, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn into_entry(raw: (String, i64, String, String)) -> anyhow::Result<SummaryCacheEntry> {
        let (session_id, messages_covered, summary_text, created_at) = raw;
        let created_at = DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc);
        Ok(SummaryCacheEntry {
            session_id,
            messages_covered: messages_covered as usize,
            summary_text,
            created_at,
        })
    }

    /// Every cached summary of a session, highest coverage first.
    pub fn get_session_summaries(&self, session_id: &str) -> anyhow::Result<Vec<SummaryCacheEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, messages_covered, summary_text, created_at
             FROM summaries WHERE session_id = ?1 ORDER BY messages_covered DESC"
        )?;
        let raw = stmt
            .query_map([session_id], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(Self::into_entry).collect()
    }

    pub fn count(&self, session_id: &str) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM summaries WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Runs on the caller's connection so it can share a transaction.
    pub fn delete_session_summaries(conn: &Connection, session_id: &str) -> anyhow::Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM summaries WHERE session_id = ?1",
            [session_id],
        )?;

        info!("Deleted {} summaries for session {}", deleted, session_id);
        Ok(deleted)
    }
}

impl SummaryCache for SummaryStore {
    fn get(&self, session_id: &str, messages_covered: usize) -> anyhow::Result<Option<String>> {
        let conn = self.get_conn()?;
        let text = conn
            .query_row(
                "SELECT summary_text FROM summaries
                 WHERE session_id = ?1 AND messages_covered = ?2",
                params![session_id, messages_covered as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    fn get_latest(&self, session_id: &str) -> anyhow::Result<Option<SummaryCacheEntry>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT session_id, messages_covered, summary_text, created_at
                 FROM summaries WHERE session_id = ?1
                 ORDER BY messages_covered DESC LIMIT 1",
                [session_id],
                Self::row_to_entry,
            )
            .optional()?;
        raw.map(Self::into_entry).transpose()
    }

    fn get_latest_at_most(
        &self,
        session_id: &str,
        max_covered: usize,
    ) -> anyhow::Result<Option<SummaryCacheEntry>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT session_id, messages_covered, summary_text, created_at
                 FROM summaries WHERE session_id = ?1 AND messages_covered <= ?2
                 ORDER BY messages_covered DESC LIMIT 1",
                params![session_id, max_covered as i64],
                Self::row_to_entry,
            )
            .optional()?;
        raw.map(Self::into_entry).transpose()
    }

    fn put(&self, session_id: &str, messages_covered: usize, summary_text: &str) -> anyhow::Result<()> {
        if messages_covered == 0 {
            return Err(anyhow::anyhow!("Summary must cover at least one message"));
        }
        let conn = self.get_conn()?;

        debug!(
            "Caching summary for session {} covering {} messages",
            session_id, messages_covered
        );

        conn.execute(
            "INSERT INTO summaries (session_id, messages_covered, summary_text, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (session_id, messages_covered)
             DO UPDATE SET summary_text = excluded.summary_text, created_at = excluded.created_at",
            params![
                session_id,
                messages_covered as i64,
                summary_text,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;

        Ok(())
    }
}
