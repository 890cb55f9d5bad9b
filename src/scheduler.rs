use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::flusher::{BatchFlusher, FlushReport};

/// Spawn a background task that runs the flusher every `period`.
///
/// Runs execute on the blocking pool because the store is synchronous
/// SQLite. Each run is awaited before the next tick is considered, so runs
/// never overlap. When `shutdown` resolves the task performs one last run
/// and exits; a run already in flight finishes first.
pub fn spawn_flush_loop<F>(
    flusher: Arc<BatchFlusher>,
    period: Duration,
    shutdown: F,
) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // Don't pile up ticks while a slow run is in progress.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    run_once(&flusher).await;
                    tracing::info!("Usage flusher shutting down");
                    break;
                }
                _ = interval.tick() => {
                    run_once(&flusher).await;
                }
            }
        }
    })
}

/// Execute a single run off the async runtime.
pub async fn run_once(flusher: &Arc<BatchFlusher>) -> Option<FlushReport> {
    let flusher = Arc::clone(flusher);
    match tokio::task::spawn_blocking(move || flusher.run()).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!(error = %e, "Usage flush task panicked");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlusherConfig;
    use crate::db::Database;
    use crate::flusher::FlushOutcome;
    use crate::queue::{MemoryQueue, UsageQueue};
    use crate::store::SqliteUsageStore;
    use crate::store::test_support::count;
    use crate::usage::{self, fixtures::entry};
    use tokio::sync::oneshot;

    fn setup() -> (MemoryQueue, Database, Arc<BatchFlusher>) {
        let queue = MemoryQueue::new("usage:logs:queue");
        let db = Database::open_in_memory().unwrap();
        let flusher = BatchFlusher::new(
            Some(Arc::new(queue.clone())),
            Arc::new(SqliteUsageStore::new(db.clone())),
            &FlusherConfig::default(),
        );
        (queue, db, Arc::new(flusher))
    }

    #[tokio::test]
    async fn test_run_once_returns_report() {
        let (queue, db, flusher) = setup();
        usage::enqueue(&queue, &entry("r1")).unwrap();

        let report = run_once(&flusher).await.unwrap();
        assert_eq!(report.outcome, FlushOutcome::Flushed(1));
        assert_eq!(count(&db, "usage_log"), 1);
    }

    #[tokio::test]
    async fn test_flush_loop_runs_periodically() {
        let (queue, db, flusher) = setup();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = spawn_flush_loop(flusher, Duration::from_millis(50), async move {
            let _ = rx.await;
        });

        usage::enqueue(&queue, &entry("r1")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count(&db, "usage_log"), 1);

        usage::enqueue(&queue, &entry("r2")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count(&db, "usage_log"), 2);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_loop_final_run_on_shutdown() {
        let (queue, db, flusher) = setup();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = spawn_flush_loop(flusher, Duration::from_secs(3600), async move {
            let _ = rx.await;
        });

        usage::enqueue(&queue, &entry("r1")).unwrap();
        usage::enqueue(&queue, &entry("r2")).unwrap();
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(count(&db, "usage_log"), 2);
        assert!(queue.is_empty().unwrap());
    }
}
