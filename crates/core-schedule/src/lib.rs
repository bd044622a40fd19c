//! Update scheduling for one display pipeline.
//!
//! Callers queue time-stamped, priority-weighted jobs; the scheduler groups
//! them into batches that each produce one flush, never more often than the
//! rate limit allows. Time is always passed in explicitly (`Instant`), so the
//! whole crate is deterministic under test.

pub mod batch;
pub mod cooldown;
pub mod job;
pub mod scheduler;

use std::time::Duration;

/// Minimum spacing between two flushes to the same viewer.
pub const HINT_RATE_LIMIT: Duration = Duration::from_millis(525);

/// Jobs due within this window of a batch's first job join that batch.
pub const MIN_BATCH_WINDOW: Duration = Duration::from_millis(625);

pub use batch::{BatchJob, BatchSpan};
pub use cooldown::Cooldown;
pub use job::{Action, JobFailure, JobScope, JobToken, ScheduledJob};
pub use scheduler::{BatchReport, Scheduler, SchedulerMetrics, SchedulerMetricsSnapshot};
