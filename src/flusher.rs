use std::sync::Arc;

use crate::config::{DeadLetterPolicy, FlusherConfig};
use crate::error::StoreError;
use crate::queue::{Popped, UsageQueue};
use crate::store::UsageStore;
use crate::usage::{self, UsageLogEntry};

/// Upper bound on the batch buffer preallocation.
const MAX_PREALLOC: usize = 1024;

/// How a single run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// No queue is configured; nothing was touched.
    Inert,
    /// Nothing parseable was popped; the store was not touched.
    Idle,
    /// The batch was committed.
    Flushed(usize),
    /// The bulk insert failed and nothing was committed.
    Failed { error: String },
}

/// Summary of one run, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    /// Items removed from the queue, malformed ones included.
    pub popped: usize,
    /// Items dropped because they did not parse.
    pub malformed: usize,
    /// Whether popping stopped early on a queue error.
    pub pop_error: bool,
    /// Entries handed to the dead-letter policy after a failed insert.
    pub dead_lettered: usize,
    pub outcome: FlushOutcome,
}

impl FlushReport {
    fn new(outcome: FlushOutcome) -> Self {
        Self {
            popped: 0,
            malformed: 0,
            pop_error: false,
            dead_lettered: 0,
            outcome,
        }
    }

    /// Entries that parsed and made it into the batch.
    pub fn parsed(&self) -> usize {
        self.popped - self.malformed
    }
}

/// Drains up to `batch_size` queued usage entries per run and bulk-inserts
/// them into the store.
///
/// A run never fails: malformed items are logged and dropped, and a failed
/// insert is logged and handed to the configured [`DeadLetterPolicy`]. The
/// flusher does not guard against overlapping runs; the scheduler is
/// expected to call [`BatchFlusher::run`] sequentially.
pub struct BatchFlusher {
    queue: Option<Arc<dyn UsageQueue>>,
    store: Arc<dyn UsageStore>,
    batch_size: usize,
    dead_letter: DeadLetterPolicy,
}

impl BatchFlusher {
    /// Build a flusher. Passing `None` for the queue yields an inert flusher
    /// whose runs are no-ops, used when the queue failed to connect.
    pub fn new(
        queue: Option<Arc<dyn UsageQueue>>,
        store: Arc<dyn UsageStore>,
        config: &FlusherConfig,
    ) -> Self {
        Self {
            queue,
            store,
            batch_size: config.batch_size,
            dead_letter: config.dead_letter,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.queue.is_none()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one drain-and-persist pass.
    pub fn run(&self) -> FlushReport {
        let Some(queue) = self.queue.as_deref() else {
            tracing::debug!("Usage queue unavailable, skipping flush");
            return FlushReport::new(FlushOutcome::Inert);
        };

        let mut report = FlushReport::new(FlushOutcome::Idle);
        let batch = self.drain(queue, &mut report);

        if batch.is_empty() {
            tracing::debug!(
                popped = report.popped,
                malformed = report.malformed,
                "No usage logs to flush"
            );
            return report;
        }

        match self.store.bulk_insert(&batch) {
            Ok(count) => {
                tracing::info!(
                    count,
                    malformed = report.malformed,
                    "Flushed usage logs to database"
                );
                report.outcome = FlushOutcome::Flushed(count);
            }
            Err(e) => {
                tracing::error!(
                    count = batch.len(),
                    store = self.store.name(),
                    error = %e,
                    "Failed to bulk insert usage logs"
                );
                report.dead_lettered = self.dead_letter(queue, &batch, &e);
                report.outcome = FlushOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }

        report
    }

    /// Pop up to `batch_size` items, keeping the ones that parse.
    fn drain(&self, queue: &dyn UsageQueue, report: &mut FlushReport) -> Vec<UsageLogEntry> {
        let mut batch = Vec::with_capacity(self.batch_size.min(MAX_PREALLOC));

        for _ in 0..self.batch_size {
            match queue.pop_oldest() {
                Ok(Popped::Item(raw)) => {
                    report.popped += 1;
                    match UsageLogEntry::from_slice(&raw) {
                        Ok(entry) => batch.push(entry),
                        Err(e) => {
                            report.malformed += 1;
                            tracing::error!(error = %e, "Failed to parse usage log entry");
                        }
                    }
                }
                Ok(Popped::Empty) => break,
                Err(e) => {
                    // Keep what was already popped; the rest waits for the next run.
                    report.pop_error = true;
                    tracing::warn!(
                        queue = queue.name(),
                        error = %e,
                        "Failed to pop usage log entry, ending drain early"
                    );
                    break;
                }
            }
        }

        batch
    }

    /// Apply the dead-letter policy to a batch whose insert failed. Returns
    /// how many entries were parked.
    fn dead_letter(
        &self,
        queue: &dyn UsageQueue,
        batch: &[UsageLogEntry],
        cause: &StoreError,
    ) -> usize {
        match self.dead_letter {
            DeadLetterPolicy::Drop => {
                tracing::warn!(count = batch.len(), "Dropped usage log batch");
                0
            }
            DeadLetterPolicy::Requeue => {
                let mut requeued = 0;
                for entry in batch {
                    match usage::enqueue(queue, entry) {
                        Ok(()) => requeued += 1,
                        Err(e) => {
                            tracing::error!(
                                request_id = %entry.request_id,
                                error = %e,
                                "Failed to requeue usage log entry"
                            );
                        }
                    }
                }
                tracing::warn!(count = requeued, "Requeued usage log batch");
                requeued
            }
            DeadLetterPolicy::Table => {
                match self.store.write_dead_letters(batch, &cause.to_string()) {
                    Ok(count) => {
                        tracing::warn!(count, "Moved usage log batch to dead-letter table");
                        count
                    }
                    Err(e) => {
                        tracing::error!(
                            count = batch.len(),
                            error = %e,
                            "Failed to dead-letter usage log batch, dropping it"
                        );
                        0
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
