//! Update scheduler.
//!
//! Jobs are kept sorted by due time (stable for equal times). `batches`
//! groups them by the coalescing window; the first batch may run once both
//! its weighted time and the cooldown allow it. Executing a batch suspends
//! the scheduler: actions see a `JobScope` whose scheduling is deferred into
//! the next batch and whose update requests are dropped. Afterwards deferred
//! jobs are promoted and the cooldown restarts.
//!
//! Job lifecycle: pending -> batched -> executed, or pending -> cancelled.
//! Cancelling a job that already left the pending list reports `false`.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::batch::{self, BatchJob, BatchSpan};
use crate::cooldown::Cooldown;
use crate::job::{JobFailure, JobScope, JobToken, ScheduledJob};
use crate::{HINT_RATE_LIMIT, MIN_BATCH_WINDOW};

/// Outcome of one executed batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub executed: usize,
    pub failures: Vec<JobFailure>,
    /// Jobs scheduled by actions and promoted into the pending list.
    pub deferred: usize,
    pub suppressed_updates: usize,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Simple atomic counters, readable through `snapshot`.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    scheduled: AtomicU64,
    duplicates: AtomicU64,
    cancelled: AtomicU64,
    batches: AtomicU64,
    jobs_executed: AtomicU64,
    job_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerMetricsSnapshot {
    pub scheduled: u64,
    pub duplicates: u64,
    pub cancelled: u64,
    pub batches: u64,
    pub jobs_executed: u64,
    pub job_failures: u64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            scheduled: self.scheduled.load(Relaxed),
            duplicates: self.duplicates.load(Relaxed),
            cancelled: self.cancelled.load(Relaxed),
            batches: self.batches.load(Relaxed),
            jobs_executed: self.jobs_executed.load(Relaxed),
            job_failures: self.job_failures.load(Relaxed),
        }
    }
}

pub struct Scheduler<Ctx> {
    pending: Vec<ScheduledJob<Ctx>>,
    cooldown: Cooldown,
    rate_limit: Duration,
    window: Duration,
    metrics: SchedulerMetrics,
}

impl<Ctx> Default for Scheduler<Ctx> {
    fn default() -> Self {
        Self::new(HINT_RATE_LIMIT, MIN_BATCH_WINDOW)
    }
}

impl<Ctx> Scheduler<Ctx> {
    pub fn new(rate_limit: Duration, window: Duration) -> Self {
        Self {
            pending: Vec::new(),
            cooldown: Cooldown::new(),
            rate_limit,
            window,
            metrics: SchedulerMetrics::default(),
        }
    }

    pub fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    pub fn metrics_snapshot(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains_token(&self, token: JobToken) -> bool {
        self.pending.iter().any(|j| j.token == Some(token))
    }

    /// Queue `job`. A job whose token is already pending is dropped and
    /// `false` returned.
    pub fn schedule(&mut self, job: ScheduledJob<Ctx>) -> bool {
        if let Some(token) = job.token {
            if self.contains_token(token) {
                self.metrics.duplicates.fetch_add(1, Relaxed);
                trace!(target: "schedule.batch", ?token, "duplicate_token_ignored");
                return false;
            }
        }
        let at = self.pending.partition_point(|j| j.due_at <= job.due_at);
        trace!(target: "schedule.batch", ?job, index = at, "job_scheduled");
        self.pending.insert(at, job);
        self.metrics.scheduled.fetch_add(1, Relaxed);
        true
    }

    pub fn schedule_update(&mut self, due_at: Instant, priority: u32) -> bool {
        self.schedule(ScheduledJob::update(due_at, priority))
    }

    /// Remove every pending job carrying `token`.
    pub fn cancel(&mut self, token: JobToken) -> bool {
        let before = self.pending.len();
        self.pending.retain(|j| j.token != Some(token));
        let removed = before - self.pending.len();
        if removed > 0 {
            self.metrics.cancelled.fetch_add(removed as u64, Relaxed);
            debug!(target: "schedule.batch", ?token, removed, "jobs_cancelled");
        }
        removed > 0
    }

    pub fn batches(&self) -> Vec<BatchSpan> {
        batch::group(&self.pending, self.window)
    }

    fn first_span(&self) -> Option<BatchSpan> {
        // Only the first window matters; avoid grouping the whole list.
        let first = self.pending.first()?;
        let limit = first.due_at + self.window;
        let end = self.pending.partition_point(|j| j.due_at < limit).max(1);
        let perform_at = batch::weighted_perform_at(&self.pending[..end])?;
        Some(BatchSpan {
            range: 0..end,
            first_due: first.due_at,
            perform_at,
        })
    }

    /// When the next batch may flush: its weighted time, pushed back to the
    /// cooldown expiry if that is later.
    pub fn next_flush_at(&self) -> Option<Instant> {
        self.first_span()
            .map(|span| self.cooldown.clamp(span.perform_at))
    }

    /// Pop the first batch if it is due at `now`.
    pub fn take_due_batch(&mut self, now: Instant) -> Option<BatchJob<Ctx>> {
        let span = self.first_span()?;
        let flush_at = self.cooldown.clamp(span.perform_at);
        if now < flush_at {
            return None;
        }
        let jobs: Vec<_> = self.pending.drain(span.range).collect();
        debug!(target: "schedule.batch", jobs = jobs.len(), remaining = self.pending.len(), "batch_taken");
        Some(BatchJob {
            jobs,
            perform_at: span.perform_at,
        })
    }

    /// Run every action in `batch` against `ctx`.
    ///
    /// A failing action is logged and reported; the rest of the batch still
    /// runs. Jobs the actions schedule are promoted afterwards (token dedupe
    /// applies), then cancellations requested by actions, then the cooldown
    /// restarts at `now`.
    pub fn execute(&mut self, batch: BatchJob<Ctx>, ctx: &mut Ctx, now: Instant) -> BatchReport {
        let mut report = BatchReport::default();
        let mut scope = JobScope::new(ctx, now);

        for job in batch.jobs {
            let token = job.token;
            let Some(action) = job.action else {
                continue;
            };
            report.executed += 1;
            if let Err(error) = action(&mut scope) {
                error!(target: "schedule.job", ?token, error = %error, "job_failed");
                report.failures.push(JobFailure { token, error });
            }
        }

        report.suppressed_updates = scope.suppressed_updates;
        let JobScope {
            deferred,
            cancelled,
            ..
        } = scope;
        for job in deferred {
            if self.schedule(job) {
                report.deferred += 1;
            }
        }
        for token in cancelled {
            self.cancel(token);
        }

        self.cooldown.start(now, self.rate_limit);
        self.metrics.batches.fetch_add(1, Relaxed);
        self.metrics
            .jobs_executed
            .fetch_add(report.executed as u64, Relaxed);
        self.metrics
            .job_failures
            .fetch_add(report.failures.len() as u64, Relaxed);
        debug!(
            target: "schedule.batch",
            executed = report.executed,
            failures = report.failures.len(),
            deferred = report.deferred,
            "batch_executed"
        );
        report
    }
}
