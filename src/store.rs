use std::sync::Arc;

use rusqlite::params;
use uuid::Uuid;

use crate::db::Database;
use crate::error::StoreError;
use crate::usage::UsageLogEntry;

/// Transactional bulk-write capability over the `usage_log` schema.
///
/// A call either persists every entry or none of them.
pub trait UsageStore: Send + Sync {
    /// Insert all entries in one transaction and commit. Returns the number
    /// of rows written.
    fn bulk_insert(&self, entries: &[UsageLogEntry]) -> Result<usize, StoreError>;

    /// Park entries that could not be persisted, with the failure reason.
    fn write_dead_letters(
        &self,
        entries: &[UsageLogEntry],
        reason: &str,
    ) -> Result<usize, StoreError>;

    /// Get the name of this store backend.
    fn name(&self) -> &str;
}

impl<T: UsageStore + ?Sized> UsageStore for Arc<T> {
    fn bulk_insert(&self, entries: &[UsageLogEntry]) -> Result<usize, StoreError> {
        (**self).bulk_insert(entries)
    }
    fn write_dead_letters(
        &self,
        entries: &[UsageLogEntry],
        reason: &str,
    ) -> Result<usize, StoreError> {
        (**self).write_dead_letters(entries, reason)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// `usage_log` writer on top of the shared SQLite handle.
#[derive(Clone)]
pub struct SqliteUsageStore {
    db: Database,
}

impl SqliteUsageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl UsageStore for SqliteUsageStore {
    /// Dropping the transaction without `commit` rolls it back, so any
    /// failing row leaves the table untouched.
    fn bulk_insert(&self, entries: &[UsageLogEntry]) -> Result<usize, StoreError> {
        let written = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            {
                let mut insert_stmt = tx.prepare_cached(
                    "INSERT INTO usage_log (id, user_id, request_id, provider, model, \
                     input_tokens, output_tokens, cost, latency_ms, status, occurred_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;

                for entry in entries {
                    let id = Uuid::new_v4().to_string();
                    // SQLite integers are signed 64-bit.
                    let latency_ms = i64::try_from(entry.latency_ms)
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                    insert_stmt.execute(params![
                        id,
                        entry.user_id,
                        entry.request_id,
                        entry.provider,
                        entry.model,
                        entry.input_tokens,
                        entry.output_tokens,
                        entry.cost,
                        latency_ms,
                        entry.status,
                        entry.timestamp.to_rfc3339(),
                    ])?;
                }
            }

            tx.commit()?;
            Ok(entries.len())
        })?;

        Ok(written)
    }

    fn write_dead_letters(
        &self,
        entries: &[UsageLogEntry],
        reason: &str,
    ) -> Result<usize, StoreError> {
        let payloads = entries
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let written = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO usage_dead_letter (id, payload, reason) VALUES (?1, ?2, ?3)",
                )?;
                for payload in &payloads {
                    stmt.execute(params![Uuid::new_v4().to_string(), payload, reason])?;
                }
            }

            tx.commit()?;
            Ok(payloads.len())
        })?;

        Ok(written)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
