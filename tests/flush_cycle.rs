use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use usage_flusher::config::{DeadLetterPolicy, FlusherConfig, QueueBackend, QueueConfig};
use usage_flusher::db::Database;
use usage_flusher::queue::{self, SqliteQueue};
use usage_flusher::usage::enqueue;
use usage_flusher::{BatchFlusher, FlushOutcome, SqliteUsageStore, UsageLogEntry, UsageQueue};

fn entry(request_id: &str) -> UsageLogEntry {
    UsageLogEntry {
        user_id: "alice".to_string(),
        request_id: request_id.to_string(),
        provider: "copilot".to_string(),
        model: "gpt-4o".to_string(),
        input_tokens: 512,
        output_tokens: 128,
        cost: 0.004,
        latency_ms: 870,
        status: "success".to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap(),
    }
}

fn persisted(db: &Database) -> Vec<String> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT request_id FROM usage_log ORDER BY request_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
    .unwrap()
}

fn flusher_config(batch_size: usize, dead_letter: DeadLetterPolicy) -> FlusherConfig {
    FlusherConfig {
        batch_size,
        dead_letter,
        ..FlusherConfig::default()
    }
}

fn open_pair(dir: &Path) -> (SqliteQueue, Database) {
    let queue = SqliteQueue::open(&dir.join("queue.db"), "usage:logs:queue").unwrap();
    let db = Database::open(&dir.join("usage.db")).unwrap();
    (queue, db)
}

#[test]
fn test_two_runs_drain_three_entries_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, db) = open_pair(dir.path());
    for id in ["A", "B", "C"] {
        enqueue(&queue, &entry(id)).unwrap();
    }

    let flusher = BatchFlusher::new(
        Some(Arc::new(queue.clone())),
        Arc::new(SqliteUsageStore::new(db.clone())),
        &flusher_config(2, DeadLetterPolicy::Drop),
    );

    assert_eq!(flusher.run().outcome, FlushOutcome::Flushed(2));
    assert_eq!(persisted(&db), vec!["A", "B"]);
    assert_eq!(queue.len().unwrap(), 1);

    assert_eq!(flusher.run().outcome, FlushOutcome::Flushed(1));
    assert_eq!(persisted(&db), vec!["A", "B", "C"]);
    assert!(queue.is_empty().unwrap());

    assert_eq!(flusher.run().outcome, FlushOutcome::Idle);
}

#[test]
fn test_producer_and_flusher_share_queue_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let producer = SqliteQueue::open(&path, "usage:logs:queue").unwrap();
    for i in 0..5 {
        enqueue(&producer, &entry(&format!("req-{i}"))).unwrap();
    }
    producer.push(b"{ truncated").unwrap();

    let consumer = queue::connect(&QueueConfig {
        backend: QueueBackend::Sqlite,
        path,
        key: "usage:logs:queue".to_string(),
        ..QueueConfig::default()
    })
    .unwrap();
    let db = Database::open(&dir.path().join("usage.db")).unwrap();
    let flusher = BatchFlusher::new(
        Some(consumer),
        Arc::new(SqliteUsageStore::new(db.clone())),
        &flusher_config(500, DeadLetterPolicy::Drop),
    );

    let report = flusher.run();
    assert_eq!(report.popped, 6);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.outcome, FlushOutcome::Flushed(5));
    assert_eq!(persisted(&db).len(), 5);
    assert!(producer.is_empty().unwrap());
}

#[test]
fn test_failed_write_requeues_onto_sqlite_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, db) = open_pair(dir.path());
    db.with_conn(|conn| conn.execute_batch("DROP TABLE usage_log;"))
        .unwrap();
    enqueue(&queue, &entry("A")).unwrap();
    enqueue(&queue, &entry("B")).unwrap();

    let flusher = BatchFlusher::new(
        Some(Arc::new(queue.clone())),
        Arc::new(SqliteUsageStore::new(db)),
        &flusher_config(10, DeadLetterPolicy::Requeue),
    );

    let report = flusher.run();
    assert!(matches!(report.outcome, FlushOutcome::Failed { .. }));
    assert_eq!(report.dead_lettered, 2);
    assert_eq!(queue.len().unwrap(), 2);
}

#[test]
fn test_disabled_queue_makes_flusher_inert() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("usage.db")).unwrap();

    let queue = queue::connect(&QueueConfig {
        backend: QueueBackend::Disabled,
        ..QueueConfig::default()
    })
    .ok();
    assert!(queue.is_none());

    let flusher = BatchFlusher::new(
        queue,
        Arc::new(SqliteUsageStore::new(db.clone())),
        &FlusherConfig::default(),
    );
    assert!(flusher.is_inert());
    assert_eq!(flusher.run().outcome, FlushOutcome::Inert);
    assert!(persisted(&db).is_empty());
}
