//! SQLite-backed queue.
//!
//! Items live in the `usage_queue` table, ordered by an autoincrement
//! sequence. Several producer processes and the flusher can share one file;
//! WAL mode and the busy timeout set by [`Database::open_with_schema`] handle
//! contention. A dedicated queue file holds only the `usage_queue` table.

use std::path::Path;

use rusqlite::{OptionalExtension, params};
use tracing::instrument;

use super::{Popped, UsageQueue};
use crate::db::{Database, QUEUE_SCHEMA};
use crate::error::QueueError;

#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    key: String,
}

impl SqliteQueue {
    /// Open (or create) the queue database at `path`.
    pub fn open(path: &Path, key: impl Into<String>) -> anyhow::Result<Self> {
        let db = Database::open_with_schema(path, QUEUE_SCHEMA)?;
        Ok(Self {
            db,
            key: key.into(),
        })
    }

    /// Use an already opened database, e.g. the usage store's own file. The
    /// queue table is created there if missing.
    pub fn with_database(db: Database, key: impl Into<String>) -> anyhow::Result<Self> {
        db.migrate(QUEUE_SCHEMA)?;
        Ok(Self {
            db,
            key: key.into(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl UsageQueue for SqliteQueue {
    /// Pops with a single `DELETE ... RETURNING`, so the select and the
    /// removal cannot interleave with another consumer.
    #[instrument(skip(self), fields(queue = %self.key))]
    fn pop_oldest(&self) -> Result<Popped, QueueError> {
        let popped = self.db.with_conn(|conn| {
            conn.query_row(
                "DELETE FROM usage_queue WHERE seq = \
                 (SELECT seq FROM usage_queue WHERE queue_key = ?1 ORDER BY seq LIMIT 1) \
                 RETURNING payload",
                params![self.key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
        })?;

        Ok(popped.map_or(Popped::Empty, Popped::Item))
    }

    #[instrument(skip(self, payload), fields(queue = %self.key))]
    fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO usage_queue (queue_key, payload) VALUES (?1, ?2)",
                params![self.key, payload],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn len(&self) -> Result<usize, QueueError> {
        let count: i64 = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM usage_queue WHERE queue_key = ?1",
                params![self.key],
                |row| row.get(0),
            )
        })?;
        usize::try_from(count).map_err(|e| QueueError::Backend(e.to_string()))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
