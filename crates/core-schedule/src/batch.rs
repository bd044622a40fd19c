//! Batch grouping over due-time-sorted jobs.
//!
//! Walk the sorted jobs; a job joins the current batch while its due time is
//! before `first_due + window`, otherwise it seeds a new batch. A batch runs
//! at the priority-weighted mean of its due times.

use std::ops::Range;
use std::time::{Duration, Instant};

use crate::job::ScheduledJob;

/// Jobs executed together, producing one flush.
#[derive(Debug)]
pub struct BatchJob<Ctx> {
    pub jobs: Vec<ScheduledJob<Ctx>>,
    pub perform_at: Instant,
}

/// Shape of a pending batch without taking its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpan {
    /// Indices into the scheduler's sorted pending list.
    pub range: Range<usize>,
    pub first_due: Instant,
    pub perform_at: Instant,
}

impl BatchSpan {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// `Σ(due·prio) / Σprio`, computed relative to the earliest due time so it
/// stays in `Duration` arithmetic.
pub fn weighted_perform_at<Ctx>(jobs: &[ScheduledJob<Ctx>]) -> Option<Instant> {
    let base = jobs.iter().map(|j| j.due_at).min()?;
    let mut weighted: u128 = 0;
    let mut total: u128 = 0;
    for job in jobs {
        let prio = u128::from(job.priority.max(1));
        weighted += job.due_at.duration_since(base).as_nanos() * prio;
        total += prio;
    }
    let mean = weighted / total;
    let nanos = u64::try_from(mean).unwrap_or(u64::MAX);
    Some(base + Duration::from_nanos(nanos))
}

/// Group `sorted` (ascending `due_at`) into spans.
pub fn group<Ctx>(sorted: &[ScheduledJob<Ctx>], window: Duration) -> Vec<BatchSpan> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let first_due = sorted[start].due_at;
        let limit = first_due + window;
        // The seed always belongs to its own batch, even with a zero window.
        let end = sorted[start + 1..]
            .iter()
            .position(|j| j.due_at >= limit)
            .map_or(sorted.len(), |p| start + 1 + p);
        let perform_at = weighted_perform_at(&sorted[start..end]).unwrap_or(first_due);
        spans.push(BatchSpan {
            range: start..end,
            first_due,
            perform_at,
        });
        start = end;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(base: Instant, ms: u64, prio: u32) -> ScheduledJob<()> {
        ScheduledJob::update(base + Duration::from_millis(ms), prio)
    }

    #[test]
    fn weighted_mean() {
        let base = Instant::now();
        let jobs = vec![job(base, 0, 1), job(base, 300, 2)];
        assert_eq!(weighted_perform_at(&jobs), Some(base + Duration::from_millis(200)));
        assert_eq!(weighted_perform_at::<()>(&[]), None);
    }

    #[test]
    fn groups_by_window_from_first_job() {
        let base = Instant::now();
        let jobs = vec![
            job(base, 0, 1),
            job(base, 400, 1),
            job(base, 624, 1),
            job(base, 625, 1),
            job(base, 2000, 1),
        ];
        let spans = group(&jobs, Duration::from_millis(625));
        let ranges: Vec<_> = spans.iter().map(|s| s.range.clone()).collect();
        assert_eq!(ranges, vec![0..3, 3..4, 4..5]);
        assert_eq!(spans[1].perform_at, base + Duration::from_millis(625));
    }

    #[test]
    fn zero_window_yields_one_job_per_span() {
        let base = Instant::now();
        let jobs = vec![job(base, 0, 1), job(base, 0, 1), job(base, 5, 1)];
        let spans = group(&jobs, Duration::ZERO);
        let ranges: Vec<_> = spans.iter().map(|s| s.range.clone()).collect();
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn empty_input_no_spans() {
        assert!(group::<()>(&[], Duration::from_millis(10)).is_empty());
    }
}
