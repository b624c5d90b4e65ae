//! Database migration system

use rusqlite::{Connection, Result};
use tracing::{info, warn, error};

use crate::memory_db::schema;

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the schema up to the latest version
    pub fn initialize_database(&mut self) -> Result<()> {
        info!("Initializing story database schema...");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .or_else(|_| Ok(0))
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(1, schema::SCHEMA_SQL)]
}

/// Read-only statistics over the whole database
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap_or_else(|e| {
            warn!("Stats query failed ({}): {}", sql, e);
            0
        })
    }

    Ok(schema::DatabaseStats {
        total_sessions: count(conn, "SELECT COUNT(DISTINCT session_id) FROM messages"),
        total_messages: count(conn, "SELECT COUNT(*) FROM messages"),
        total_summaries: count(conn, "SELECT COUNT(*) FROM summaries"),
        database_size_bytes: count(
            conn,
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        ),
    })
}
