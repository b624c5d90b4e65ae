//! Memory database module - SQLite-based storage for story messages and summary cache
pub mod schema;
pub mod migration;
pub mod conversation_store;
pub mod summary_store;

pub use schema::*;
pub use migration::MigrationManager;
pub use conversation_store::{ConversationStore, NewMessage, UsageTotals};
pub use summary_store::SummaryStore;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

/// Durable, append-only, time-ordered message log per session.
///
/// Positions are 1-indexed; `range` bounds are inclusive.
pub trait MessageLog: Send + Sync {
    fn count(&self, session_id: &str) -> anyhow::Result<usize>;
    fn last_n(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<StoredMessage>>;
    fn range(&self, session_id: &str, start: usize, end: usize) -> anyhow::Result<Vec<StoredMessage>>;
    fn append(&self, session_id: &str, message: NewMessage<'_>) -> anyhow::Result<StoredMessage>;
    /// Appends all messages atomically, in order.
    fn append_batch(&self, session_id: &str, messages: &[NewMessage<'_>]) -> anyhow::Result<Vec<StoredMessage>>;
}

/// Keyed cache of `(session_id, messages_covered) -> summary`.
///
/// `put` is an upsert; entries are only removed together with their session.
pub trait SummaryCache: Send + Sync {
    fn get(&self, session_id: &str, messages_covered: usize) -> anyhow::Result<Option<String>>;
    fn get_latest(&self, session_id: &str) -> anyhow::Result<Option<SummaryCacheEntry>>;
    /// Entry with the greatest coverage not exceeding `max_covered`.
    fn get_latest_at_most(&self, session_id: &str, max_covered: usize) -> anyhow::Result<Option<SummaryCacheEntry>>;
    fn put(&self, session_id: &str, messages_covered: usize, summary_text: &str) -> anyhow::Result<()>;
}

pub struct MemoryDatabase {
    pub conversations: ConversationStore,
    pub summaries: SummaryStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening story database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.busy_timeout(Duration::from_millis(5000))?;
                conn.execute_batch("PRAGMA synchronous = NORMAL;")
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        info!("Story database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Single-connection in-memory database; every pooled connection to
    /// `:memory:` would otherwise be a separate, empty database.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            summaries: SummaryStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }

    pub fn session_stats(&self, session_id: &str) -> anyhow::Result<SessionStats> {
        let totals = self.conversations.usage_totals(session_id)?;
        let cached_summaries = self.summaries.count(session_id)?;
        Ok(SessionStats {
            session_id: session_id.to_string(),
            total_messages: totals.messages,
            cached_summaries,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            total_tokens: totals.input_tokens + totals.output_tokens,
        })
    }

    /// Removes a session's messages and cached summaries in one transaction.
    /// Returns the number of messages deleted.
    pub fn delete_session(&self, session_id: &str) -> anyhow::Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let messages_deleted = ConversationStore::delete_session(&tx, session_id)?;
        let summaries_deleted = SummaryStore::delete_session_summaries(&tx, session_id)?;
        tx.commit()?;
        info!(
            "Deleted session {} ({} messages, {} summaries)",
            session_id, messages_deleted, summaries_deleted
        );
        Ok(messages_deleted)
    }
}

impl MessageLog for MemoryDatabase {
    fn count(&self, session_id: &str) -> anyhow::Result<usize> {
        self.conversations.count(session_id)
    }

    fn last_n(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<StoredMessage>> {
        self.conversations.last_n(session_id, n)
    }

    fn range(&self, session_id: &str, start: usize, end: usize) -> anyhow::Result<Vec<StoredMessage>> {
        self.conversations.range(session_id, start, end)
    }

    fn append(&self, session_id: &str, message: NewMessage<'_>) -> anyhow::Result<StoredMessage> {
        self.conversations.append(session_id, message)
    }

    fn append_batch(&self, session_id: &str, messages: &[NewMessage<'_>]) -> anyhow::Result<Vec<StoredMessage>> {
        self.conversations.append_batch(session_id, messages)
    }
}

impl SummaryCache for MemoryDatabase {
    fn get(&self, session_id: &str, messages_covered: usize) -> anyhow::Result<Option<String>> {
        self.summaries.get(session_id, messages_covered)
    }

    fn get_latest(&self, session_id: &str) -> anyhow::Result<Option<SummaryCacheEntry>> {
        self.summaries.get_latest(session_id)
    }

    fn get_latest_at_most(&self, session_id: &str, max_covered: usize) -> anyhow::Result<Option<SummaryCacheEntry>> {
        self.summaries.get_latest_at_most(session_id, max_covered)
    }

    fn put(&self, session_id: &str, messages_covered: usize, summary_text: &str) -> anyhow::Result<()> {
        self.summaries.put(session_id, messages_covered, summary_text)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}
