//! Drains queued usage-log entries and bulk-persists them to the usage
//! database, one bounded batch per run.

pub mod config;
pub mod db;
pub mod error;
pub mod flusher;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod usage;

pub use crate::flusher::{BatchFlusher, FlushOutcome, FlushReport};
pub use crate::queue::{Popped, UsageQueue};
pub use crate::store::{SqliteUsageStore, UsageStore};
pub use crate::usage::UsageLogEntry;
