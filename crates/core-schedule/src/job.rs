//! Scheduled jobs, cancellation tokens and the scope handed to running
//! actions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::trace;

/// Opaque cancellation/dedupe token. Minted from a process-wide counter so
/// unrelated callers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl JobToken {
    pub fn mint() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

pub type Action<Ctx> = Box<dyn FnOnce(&mut JobScope<'_, Ctx>) -> anyhow::Result<()> + Send>;

pub struct ScheduledJob<Ctx> {
    pub(crate) action: Option<Action<Ctx>>,
    pub due_at: Instant,
    pub priority: u32,
    pub token: Option<JobToken>,
}

impl<Ctx> ScheduledJob<Ctx> {
    /// Job running `action` no earlier than its batch. Priority is floored
    /// at 1.
    pub fn new<F>(due_at: Instant, priority: u32, action: F) -> Self
    where
        F: FnOnce(&mut JobScope<'_, Ctx>) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            action: Some(Box::new(action)),
            due_at,
            priority: priority.max(1),
            token: None,
        }
    }

    /// Job with no action: its only effect is the flush of its batch.
    pub fn update(due_at: Instant, priority: u32) -> Self {
        Self {
            action: None,
            due_at,
            priority: priority.max(1),
            token: None,
        }
    }

    pub fn with_token(mut self, token: JobToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn is_update(&self) -> bool {
        self.action.is_none()
    }
}

impl<Ctx> fmt::Debug for ScheduledJob<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("due_at", &self.due_at)
            .field("priority", &self.priority)
            .field("token", &self.token)
            .field("update", &self.is_update())
            .finish()
    }
}

/// A job whose action returned an error. Its siblings still ran.
#[derive(Debug)]
pub struct JobFailure {
    pub token: Option<JobToken>,
    pub error: anyhow::Error,
}

/// What a running action may touch: the pipeline context, the batch time, and
/// the scheduler in its suspended form.
///
/// Jobs scheduled through the scope are deferred into the next batch. Update
/// requests are suppressed, since the batch being executed flushes anyway.
pub struct JobScope<'a, Ctx> {
    pub ctx: &'a mut Ctx,
    now: Instant,
    pub(crate) deferred: Vec<ScheduledJob<Ctx>>,
    pub(crate) cancelled: Vec<JobToken>,
    pub(crate) suppressed_updates: usize,
}

impl<'a, Ctx> JobScope<'a, Ctx> {
    pub(crate) fn new(ctx: &'a mut Ctx, now: Instant) -> Self {
        Self {
            ctx,
            now,
            deferred: Vec::new(),
            cancelled: Vec::new(),
            suppressed_updates: 0,
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn schedule(&mut self, job: ScheduledJob<Ctx>) {
        trace!(target: "schedule.job", token = ?job.token, "job_deferred");
        self.deferred.push(job);
    }

    /// Cancel a pending job once the current batch finishes.
    pub fn cancel(&mut self, token: JobToken) {
        self.cancelled.push(token);
    }

    pub fn request_update(&mut self) {
        self.suppressed_updates += 1;
        trace!(target: "schedule.job", "update_request_suppressed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_floored_at_one() {
        let now = Instant::now();
        let job: ScheduledJob<()> = ScheduledJob::update(now, 0);
        assert_eq!(job.priority, 1);
        let job: ScheduledJob<()> = ScheduledJob::new(now, 7, |_| Ok(()));
        assert_eq!(job.priority, 7);
        assert!(!job.is_update());
    }

    #[test]
    fn tokens_are_unique() {
        let a = JobToken::mint();
        let b = JobToken::mint();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn scope_defers_and_suppresses() {
        let mut n = 0u32;
        let now = Instant::now();
        let mut scope = JobScope::new(&mut n, now);
        *scope.ctx += 1;
        scope.schedule(ScheduledJob::update(now, 1));
        scope.request_update();
        scope.request_update();
        assert_eq!(scope.deferred.len(), 1);
        assert_eq!(scope.suppressed_updates, 2);
        assert_eq!(scope.now(), now);
        drop(scope);
        assert_eq!(n, 1);
    }
}
