//! Async driver: one tokio task per viewer owns that viewer's `Display`.
//!
//! The task sleeps until either a command arrives or the scheduler's next
//! flush is due. Time is read from tokio's clock so paused-time tests drive
//! the pipeline deterministically.

use std::time::{Duration, Instant};

use anyhow::anyhow;
use core_compose::{Element, ElementRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::display::Display;
use crate::transport::Transport;

pub const DISPLAY_COMMAND_CAP: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCommand {
    /// Set the text of the element behind `reference`, creating it at
    /// `position` on first use. Does not request an update by itself.
    SetContent {
        reference: ElementRef,
        position: f32,
        text: String,
    },
    RequestUpdate {
        priority: u32,
    },
    ShowTemporarily {
        reference: ElementRef,
        position: f32,
        text: String,
        duration: Duration,
    },
    Remove(ElementRef),
    Shutdown,
}

/// Totals returned when a display task ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayStats {
    pub flushes: u64,
    pub jobs_executed: u64,
    pub job_failures: u64,
}

pub struct DisplayHandle {
    tx: mpsc::Sender<DisplayCommand>,
    join: JoinHandle<anyhow::Result<DisplayStats>>,
}

impl DisplayHandle {
    pub async fn send(&self, command: DisplayCommand) -> anyhow::Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("display task has stopped"))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the task to stop and wait for its totals.
    pub async fn shutdown(self) -> anyhow::Result<DisplayStats> {
        // The task may already be gone (e.g. after a transport error); its
        // result still carries the reason.
        let _ = self.tx.send(DisplayCommand::Shutdown).await;
        self.join.await?
    }
}

fn clock() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn apply<T: Transport>(display: &mut Display<T>, command: DisplayCommand, now: Instant) {
    match command {
        DisplayCommand::SetContent {
            reference,
            position,
            text,
        } => {
            display.get_or_create_element(reference, |p| Element::fixed(p, "", position));
            display.set_element_content(reference, text);
        }
        DisplayCommand::RequestUpdate { priority } => display.request_update_at(now, priority),
        DisplayCommand::ShowTemporarily {
            reference,
            position,
            text,
            duration,
        } => {
            display.get_or_create_element(reference, |p| Element::fixed(p, "", position));
            display.show_temporarily_at(now, reference, text, duration);
        }
        DisplayCommand::Remove(reference) => {
            if let Some(id) = display.store().id_for_ref(reference) {
                display.remove_element(id);
            }
        }
        DisplayCommand::Shutdown => {}
    }
}

fn stats<T: Transport>(display: &Display<T>) -> DisplayStats {
    let m = display.scheduler_metrics();
    DisplayStats {
        flushes: display.flushes(),
        jobs_executed: m.jobs_executed,
        job_failures: m.job_failures,
    }
}

/// Spawn the task driving `display`. The task ends on `Shutdown`, when every
/// handle is dropped, or with the first transport error.
pub fn spawn_display<T: Transport>(mut display: Display<T>) -> DisplayHandle {
    let (tx, mut rx) = mpsc::channel(DISPLAY_COMMAND_CAP);
    let viewer = display.viewer();
    let join = tokio::spawn(async move {
        info!(target: "display.runtime", %viewer, "display_task_started");
        loop {
            let wake = display.next_wake();
            tokio::select! {
                command = rx.recv() => match command {
                    None | Some(DisplayCommand::Shutdown) => break,
                    Some(command) => {
                        debug!(target: "display.runtime", %viewer, ?command, "display_command");
                        apply(&mut display, command, clock());
                    }
                },
                _ = sleep_until(wake), if wake.is_some() => {
                    if let Err(err) = display.poll(clock()) {
                        error!(target: "display.runtime", %viewer, error = %format!("{err:#}"), "display_flush_failed");
                        return Err(err);
                    }
                }
            }
        }
        let totals = stats(&display);
        info!(target: "display.runtime", %viewer, flushes = totals.flushes, "display_task_stopped");
        Ok(totals)
    });
    DisplayHandle { tx, join }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayOptions;
    use crate::transport::RecordingTransport;
    use core_events::ViewerId;
    use core_schedule::HINT_RATE_LIMIT;

    fn spawn(viewer: u64) -> (DisplayHandle, RecordingTransport) {
        let transport = RecordingTransport::new();
        let display = Display::with_options(ViewerId(viewer), transport.clone(), DisplayOptions::default());
        (spawn_display(display), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn update_is_flushed_by_the_task() {
        let (handle, sent) = spawn(1);
        let r = ElementRef::mint();
        handle
            .send(DisplayCommand::SetContent {
                reference: r,
                position: 300.0,
                text: "hello".into(),
            })
            .await
            .unwrap();
        handle.send(DisplayCommand::RequestUpdate { priority: 1 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.len(), 1);
        assert!(sent.last().unwrap().contains("hello"));

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_respect_cooldown() {
        let (handle, sent) = spawn(2);
        handle.send(DisplayCommand::RequestUpdate { priority: 1 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.len(), 1);

        for _ in 0..3 {
            handle.send(DisplayCommand::RequestUpdate { priority: 1 }).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sent.len(), 1, "still cooling down");

        tokio::time::sleep(HINT_RATE_LIMIT).await;
        assert_eq!(sent.len(), 2, "burst coalesced into one flush");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn show_temporarily_hides_later() {
        let (handle, sent) = spawn(3);
        let r = ElementRef::mint();
        handle
            .send(DisplayCommand::ShowTemporarily {
                reference: r,
                position: 0.0,
                text: "PING".into(),
                duration: Duration::from_secs(2),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sent.last().unwrap().contains("PING"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sent.last().unwrap(), "");
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.flushes, 2);
        assert_eq!(stats.jobs_executed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn viewers_are_independent() {
        let (a, sent_a) = spawn(10);
        let (b, sent_b) = spawn(11);
        a.send(DisplayCommand::RequestUpdate { priority: 1 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.send(DisplayCommand::RequestUpdate { priority: 1 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent_a.sent(), vec![(ViewerId(10), String::new())]);
        assert_eq!(sent_b.sent(), vec![(ViewerId(11), String::new())]);
        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_sender_stops_the_task() {
        let (handle, _) = spawn(4);
        let DisplayHandle { tx, join } = handle;
        drop(tx);
        let stats = join.await.unwrap().unwrap();
        assert_eq!(stats, DisplayStats::default());
    }
}
