//! One viewer's pipeline: elements, scheduler and transport.
//!
//! All mutation goes through `&mut Display`, so a viewer's pipeline is
//! serialized by ownership. Every time-dependent operation has an `_at(now)`
//! form; the plain form reads the system clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use anyhow::Context;
use core_compose::{Element, ElementId, ElementRef, ElementStore};
use core_config::Config;
use core_events::ViewerId;
use core_markup::{Parser, TagRegistry};
use core_schedule::{
    BatchReport, HINT_RATE_LIMIT, JobScope, JobToken, MIN_BATCH_WINDOW, ScheduledJob, Scheduler,
    SchedulerMetricsSnapshot,
};
use core_text::LayoutMetrics;
use tracing::{debug, info, trace};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayOptions {
    pub metrics: LayoutMetrics,
    pub rate_limit: Duration,
    pub batch_window: Duration,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            metrics: LayoutMetrics::default(),
            rate_limit: HINT_RATE_LIMIT,
            batch_window: MIN_BATCH_WINDOW,
        }
    }
}

impl DisplayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            metrics: config.layout_metrics(),
            rate_limit: config.rate_limit(),
            batch_window: config.batch_window(),
        }
    }
}

/// What one flush did.
#[derive(Debug)]
pub struct FlushReport {
    pub batch: BatchReport,
    pub bytes: usize,
    pub at: Instant,
}

pub struct Display<T> {
    viewer: ViewerId,
    store: ElementStore,
    scheduler: Scheduler<ElementStore>,
    transport: T,
    /// Pending hide job per temporarily shown element.
    hide_jobs: AHashMap<ElementRef, JobToken>,
    flushes: u64,
}

impl<T: Transport> Display<T> {
    pub fn new(viewer: ViewerId, parser: Parser, transport: T, options: DisplayOptions) -> Self {
        Self {
            viewer,
            store: ElementStore::new(parser),
            scheduler: Scheduler::new(options.rate_limit, options.batch_window),
            transport,
            hide_jobs: AHashMap::new(),
            flushes: 0,
        }
    }

    /// Display with a parser built from `options.metrics` and the built-in
    /// tag registry.
    pub fn with_options(viewer: ViewerId, transport: T, options: DisplayOptions) -> Self {
        let parser = Parser::new(Arc::new(TagRegistry::builtin()), options.metrics);
        Self::new(viewer, parser, transport, options)
    }

    pub fn viewer(&self) -> ViewerId {
        self.viewer
    }

    pub fn store(&self) -> &ElementStore {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetricsSnapshot {
        self.scheduler.metrics_snapshot()
    }

    pub fn add_element(&mut self, element: Element) -> ElementId {
        self.store.add(element)
    }

    /// Remove the element and cancel any hide still pending for it.
    pub fn remove_element(&mut self, id: ElementId) -> Option<Element> {
        let store = &self.store;
        let scheduler = &mut self.scheduler;
        self.hide_jobs.retain(|reference, token| {
            if store.id_for_ref(*reference) == Some(id) {
                scheduler.cancel(*token);
                false
            } else {
                true
            }
        });
        self.store.remove(id)
    }

    /// Set the text of the element behind `reference`. Returns `false` when
    /// no element is registered for it.
    pub fn set_element_content(&mut self, reference: ElementRef, text: impl Into<String>) -> bool {
        match self.store.id_for_ref(reference) {
            Some(id) => self.store.set_content(id, text),
            None => false,
        }
    }

    pub fn get_element(&self, reference: ElementRef) -> Option<&Element> {
        self.store.get_by_ref(reference)
    }

    pub fn get_element_mut(&mut self, reference: ElementRef) -> Option<&mut Element> {
        self.store.get_by_ref_mut(reference)
    }

    pub fn get_or_create_element<F>(&mut self, reference: ElementRef, factory: F) -> ElementId
    where
        F: FnOnce(&Parser) -> Element,
    {
        self.store.get_or_create_by_ref(reference, factory)
    }

    pub fn request_update(&mut self, priority: u32) {
        self.request_update_at(Instant::now(), priority);
    }

    /// Ask for a flush due at `now`; the scheduler decides when it happens.
    pub fn request_update_at(&mut self, now: Instant, priority: u32) {
        trace!(target: "display.flush", viewer = %self.viewer, priority, "update_requested");
        self.scheduler.schedule_update(now, priority);
    }

    pub fn schedule_job(&mut self, job: ScheduledJob<ElementStore>) -> bool {
        self.scheduler.schedule(job)
    }

    pub fn cancel_job(&mut self, token: JobToken) -> bool {
        self.scheduler.cancel(token)
    }

    pub fn show_temporarily(&mut self, reference: ElementRef, text: impl Into<String>, duration: Duration) -> bool {
        self.show_temporarily_at(Instant::now(), reference, text, duration)
    }

    /// Enable the element behind `reference` with `text` now and disable it
    /// again after `duration`. Showing again before the hide fires replaces
    /// the pending hide.
    ///
    /// The hide is due no sooner than one batch window after `now`, so it
    /// never shares a batch with the flush that shows the text.
    pub fn show_temporarily_at(
        &mut self,
        now: Instant,
        reference: ElementRef,
        text: impl Into<String>,
        duration: Duration,
    ) -> bool {
        let Some(id) = self.store.id_for_ref(reference) else {
            return false;
        };
        self.store.set_content(id, text);
        self.store.set_enabled(id, true);

        if let Some(previous) = self.hide_jobs.remove(&reference) {
            self.scheduler.cancel(previous);
        }
        let token = JobToken::mint();
        let hide_at = now + duration.max(self.scheduler.window());
        let hide = ScheduledJob::new(hide_at, 1, move |scope: &mut JobScope<'_, ElementStore>| {
            scope.ctx.set_enabled(id, false);
            Ok(())
        })
        .with_token(token);
        self.scheduler.schedule(hide);
        self.hide_jobs.insert(reference, token);

        self.request_update_at(now, 1);
        true
    }

    /// Instant the next flush is due, if anything is pending.
    pub fn next_wake(&self) -> Option<Instant> {
        self.scheduler.next_flush_at()
    }

    /// Run the due batch, if any, then compose and send. Transport errors
    /// propagate; job failures are only reported.
    pub fn poll(&mut self, now: Instant) -> anyhow::Result<Option<FlushReport>> {
        let Some(batch) = self.scheduler.take_due_batch(now) else {
            return Ok(None);
        };
        let batch = self.scheduler.execute(batch, &mut self.store, now);
        let hide_jobs = &mut self.hide_jobs;
        let scheduler = &self.scheduler;
        hide_jobs.retain(|_, token| scheduler.contains_token(*token));

        let text = self.compose();
        self.transport
            .send(self.viewer, &text)
            .with_context(|| format!("sending display to {}", self.viewer))?;
        self.flushes += 1;
        info!(
            target: "display.flush",
            viewer = %self.viewer,
            bytes = text.len(),
            jobs = batch.executed,
            failures = batch.failures.len(),
            "display_flushed"
        );
        Ok(Some(FlushReport {
            batch,
            bytes: text.len(),
            at: now,
        }))
    }

    pub fn compose(&self) -> String {
        let text = self.store.compose();
        debug!(target: "display.flush", viewer = %self.viewer, elements = self.store.len(), "composed");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use pretty_assertions::assert_eq;

    const MS: Duration = Duration::from_millis(1);

    fn display() -> (Display<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::new();
        let d = Display::with_options(ViewerId(1), transport.clone(), DisplayOptions::default());
        (d, transport)
    }

    #[test]
    fn request_update_flushes_once_due() {
        let (mut d, sent) = display();
        let base = Instant::now();
        let r = ElementRef::mint();
        d.get_or_create_element(r, |p| Element::fixed(p, "hello", 500.0));
        d.request_update_at(base, 1);
        assert_eq!(d.next_wake(), Some(base));
        let report = d.poll(base).unwrap().expect("flush due");
        assert_eq!(sent.len(), 1);
        assert_eq!(report.bytes, sent.last().unwrap().len());
        assert!(sent.last().unwrap().contains("hello"));
        assert_eq!(d.next_wake(), None);
        assert!(d.poll(base + MS).unwrap().is_none());
    }

    #[test]
    fn set_content_requires_registered_ref() {
        let (mut d, _) = display();
        let r = ElementRef::mint();
        assert!(!d.set_element_content(r, "x"));
        d.get_or_create_element(r, |p| Element::fixed(p, "", 0.0));
        assert!(d.set_element_content(r, "<b>x"));
        assert_eq!(d.get_element(r).unwrap().text(), "<b>x");
    }

    #[test]
    fn rapid_updates_are_rate_limited() {
        let (mut d, sent) = display();
        let base = Instant::now();
        d.request_update_at(base, 1);
        d.poll(base).unwrap();
        for i in 1..=5 {
            d.request_update_at(base + i * 10 * MS, 1);
        }
        assert!(d.poll(base + 100 * MS).unwrap().is_none());
        assert_eq!(d.next_wake(), Some(base + HINT_RATE_LIMIT));
        assert!(d.poll(base + HINT_RATE_LIMIT).unwrap().is_some());
        assert_eq!(sent.len(), 2, "five requests coalesce into one flush");
    }

    #[test]
    fn show_temporarily_hides_after_duration() {
        let (mut d, sent) = display();
        let base = Instant::now();
        let r = ElementRef::mint();
        d.get_or_create_element(r, |p| Element::fixed(p, "", 0.0).disabled());
        assert!(d.show_temporarily_at(base, r, "SHOWN", Duration::from_secs(3)));
        d.poll(base).unwrap().expect("shown immediately");
        assert!(sent.last().unwrap().contains("SHOWN"));

        let hide_at = base + Duration::from_secs(3);
        assert_eq!(d.next_wake(), Some(hide_at));
        d.poll(hide_at).unwrap().expect("hide flush");
        assert_eq!(sent.last().unwrap(), "");
        assert!(!d.get_element(r).unwrap().enabled);
    }

    #[test]
    fn short_show_is_sent_before_hide() {
        let (mut d, sent) = display();
        let base = Instant::now();
        let r = ElementRef::mint();
        d.get_or_create_element(r, |p| Element::fixed(p, "", 0.0).disabled());
        d.show_temporarily_at(base, r, "SHOWN", 300 * MS);

        let mut now = base;
        while let Some(wake) = d.next_wake() {
            now = now.max(wake);
            d.poll(now).unwrap();
        }
        assert_eq!(d.flushes(), 2);
        assert!(sent.sent()[0].1.contains("SHOWN"));
        assert_eq!(sent.last().unwrap(), "");
        assert_eq!(now, base + MIN_BATCH_WINDOW);
    }

    #[test]
    fn removing_element_cancels_its_hide() {
        let (mut d, _) = display();
        let base = Instant::now();
        let r = ElementRef::mint();
        let id = d.get_or_create_element(r, |p| Element::fixed(p, "", 0.0));
        d.show_temporarily_at(base, r, "x", Duration::from_secs(2));
        d.poll(base).unwrap();
        assert!(d.next_wake().is_some());

        assert!(d.remove_element(id).is_some());
        assert_eq!(d.scheduler_metrics().cancelled, 1);
        assert_eq!(d.next_wake(), None);
    }

    #[test]
    fn show_again_replaces_pending_hide() {
        let (mut d, _) = display();
        let base = Instant::now();
        let r = ElementRef::mint();
        d.get_or_create_element(r, |p| Element::fixed(p, "", 0.0));
        d.show_temporarily_at(base, r, "one", Duration::from_secs(1));
        d.show_temporarily_at(base, r, "two", Duration::from_secs(5));
        assert_eq!(d.scheduler_metrics().cancelled, 1);
        d.poll(base).unwrap();
        // Only the later hide remains.
        assert_eq!(d.next_wake(), Some(base + Duration::from_secs(5)));
    }

    #[test]
    fn show_temporarily_unknown_ref() {
        let (mut d, _) = display();
        assert!(!d.show_temporarily_at(Instant::now(), ElementRef::mint(), "x", MS));
    }

    #[test]
    fn cancelled_job_never_runs() {
        let (mut d, _) = display();
        let base = Instant::now();
        let r = ElementRef::mint();
        let id = d.get_or_create_element(r, |p| Element::fixed(p, "x", 0.0));
        let token = JobToken::mint();
        d.schedule_job(
            ScheduledJob::new(base, 1, move |scope: &mut JobScope<'_, ElementStore>| {
                scope.ctx.set_enabled(id, false);
                Ok(())
            })
            .with_token(token),
        );
        assert!(d.cancel_job(token));
        assert!(d.poll(base).unwrap().is_none());
        assert!(d.get_element(r).unwrap().enabled);
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&mut self, _viewer: ViewerId, _text: &str) -> anyhow::Result<()> {
            anyhow::bail!("socket closed")
        }
    }

    #[test]
    fn transport_errors_propagate() {
        let mut d = Display::with_options(ViewerId(9), FailingTransport, DisplayOptions::default());
        let base = Instant::now();
        d.request_update_at(base, 1);
        let err = d.poll(base).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("viewer#9"), "{chain}");
        assert!(chain.contains("socket closed"), "{chain}");
        assert_eq!(d.flushes(), 0);
    }

    #[test]
    fn options_follow_config() {
        let cfg = Config {
            raw: None,
            file: core_config::parse_str("[schedule]\nrate_limit_ms = 100\nbatch_window_ms = 50\n").unwrap(),
        };
        let opts = DisplayOptions::from_config(&cfg);
        assert_eq!(opts.rate_limit, 100 * MS);
        assert_eq!(opts.batch_window, 50 * MS);
    }
}
