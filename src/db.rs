use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the usage database at the given path with WAL mode.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Self::open_with_schema(path, USAGE_SCHEMA)
    }

    /// Open or create a database file and apply only `schema` to it.
    pub fn open_with_schema(path: &Path, schema: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets the gateway keep reading usage while a batch commits.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate(schema)?;
        Ok(db)
    }

    /// Open an in-memory usage database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate(USAGE_SCHEMA)?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection. The
    /// connection is released when the closure returns, on every path.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    /// Apply an idempotent `CREATE ... IF NOT EXISTS` schema.
    pub fn migrate(&self, schema: &str) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(schema)?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Tables owned by the usage store.
pub const USAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_log (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    request_id      TEXT NOT NULL,
    provider        TEXT NOT NULL,
    model           TEXT NOT NULL,
    input_tokens    INTEGER NOT NULL DEFAULT 0,
    output_tokens   INTEGER NOT NULL DEFAULT 0,
    cost            REAL NOT NULL DEFAULT 0.0,
    latency_ms      INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL DEFAULT 'success',
    occurred_at     TEXT NOT NULL,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_usage_log_user ON usage_log(user_id);
CREATE INDEX IF NOT EXISTS idx_usage_log_provider ON usage_log(provider);
CREATE INDEX IF NOT EXISTS idx_usage_log_occurred ON usage_log(occurred_at);

CREATE TABLE IF NOT EXISTS usage_dead_letter (
    id              TEXT PRIMARY KEY,
    payload         TEXT NOT NULL,
    reason          TEXT NOT NULL,
    failed_at       TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Table backing the sqlite queue.
pub const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_queue (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_key       TEXT NOT NULL,
    payload         BLOB NOT NULL,
    enqueued_at     TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_usage_queue_key ON usage_queue(queue_key, seq);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(db: &Database, name: &str) -> bool {
        db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )
        })
        .unwrap()
            == 1
    }

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        assert!(table_exists(&db, "usage_log"));
        assert!(table_exists(&db, "usage_dead_letter"));
        assert!(!table_exists(&db, "usage_queue"));
    }

    #[test]
    fn test_queue_schema_creates_only_queue_table() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with_schema(&dir.path().join("queue.db"), QUEUE_SCHEMA).unwrap();
        assert!(table_exists(&db, "usage_queue"));
        assert!(!table_exists(&db, "usage_log"));
        assert!(!table_exists(&db, "usage_dead_letter"));
    }

    #[test]
    fn test_migrate_adds_schema_to_open_database() {
        let db = Database::open_in_memory().unwrap();
        db.migrate(QUEUE_SCHEMA).unwrap();
        db.migrate(QUEUE_SCHEMA).unwrap();
        assert!(table_exists(&db, "usage_log"));
        assert!(table_exists(&db, "usage_queue"));
    }

    #[test]
    fn test_open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");

        let first = Database::open(&path).unwrap();
        drop(first);
        let second = Database::open(&path).unwrap();
        assert!(table_exists(&second, "usage_log"));
    }
}
