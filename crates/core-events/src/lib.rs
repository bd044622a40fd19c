//! Runtime event types and async event sources for hintstack.
//!
//! Every producer (tick timer, scripted driver, a future network listener)
//! pushes `Event`s into one bounded mpsc channel consumed by the binary's
//! event loop, which owns the per-viewer display tasks.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// Bounded channel sized by `EVENT_CHANNEL_CAP`. Sources `send(..).await`, so a slow loop applies
// backpressure to producers instead of dropping viewer lifecycle events. A failed send means the
// loop is gone and the source must stop.
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 1024;

pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static SCRIPT_EVENTS_EMITTED: AtomicU64 = AtomicU64::new(0);

/// Identifier of a connected viewer, as assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer#{}", self.0)
    }
}

impl FromStr for ViewerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ViewerId)
    }
}

/// Viewer lifecycle and content changes routed to per-viewer displays.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A viewer joined; the loop creates its display pipeline.
    ViewerConnected(ViewerId),
    /// A viewer left; its pipeline is torn down.
    ViewerDisconnected(ViewerId),
    /// Set the text of the element named `slot` for `viewer`, creating it at
    /// `position` on first use.
    SetContent {
        viewer: ViewerId,
        slot: String,
        position: f32,
        text: String,
    },
    RequestUpdate {
        viewer: ViewerId,
        priority: u32,
    },
    /// Periodic monotonic tick.
    Tick,
    Shutdown,
}

/// Producer of runtime events (timers, driver scripts). `spawn` starts one
/// task that feeds the shared channel until it closes.
pub trait AsyncEventSource: Send + 'static {
    /// Stable identifier (used for logging).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task. Implementors stop when
    /// `tx.send(..).await` returns Err (channel closed) or on their own stop condition.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources, spawned together at startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Spawn all registered sources, returning their JoinHandles. Each source receives its own
    /// clone of `tx`; the registry keeps none. During shutdown the caller should drop its final
    /// `Sender` before awaiting the handles so sources observe the closed channel.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        // Drained so a second call spawns nothing.
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

async fn send_or_stop(tx: &Sender<Event>, event: Event, source: &'static str) -> bool {
    if tx.send(event).await.is_err() {
        CHANNEL_SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "runtime.events", source, "event channel closed");
        return false;
    }
    true
}

/// Emits `Event::Tick` every configured interval.
pub struct TickEventSource {
    interval: Duration,
}

impl TickEventSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                if !send_or_stop(&tx, Event::Tick, "tick").await {
                    break;
                }
            }
        })
    }
}

/// One line of a driver script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Emit(Event),
    Wait(Duration),
}

/// Parse one script line. Blank lines and `#` comments yield `None`.
///
/// ```text
/// connect <viewer>
/// disconnect <viewer>
/// set <viewer> <slot> <position> <text...>
/// update <viewer> [priority]
/// wait <millis>
/// shutdown
/// ```
pub fn parse_script_line(line: &str) -> anyhow::Result<Option<ScriptStep>> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let mut args = rest.splitn(4, ' ');

    let step = match command {
        "connect" => ScriptStep::Emit(Event::ViewerConnected(
            required(&mut args, command, "a viewer id")?.parse()?,
        )),
        "disconnect" => ScriptStep::Emit(Event::ViewerDisconnected(
            required(&mut args, command, "a viewer id")?.parse()?,
        )),
        "set" => {
            let viewer = required(&mut args, command, "a viewer id")?.parse()?;
            let slot = required(&mut args, command, "a slot name")?.to_string();
            let position = required(&mut args, command, "a position")?
                .parse()
                .context("position must be a number")?;
            let text = args.next().unwrap_or("").replace("\\n", "\n");
            ScriptStep::Emit(Event::SetContent {
                viewer,
                slot,
                position,
                text,
            })
        }
        "update" => {
            let viewer = required(&mut args, command, "a viewer id")?.parse()?;
            let priority = match args.next().filter(|a| !a.is_empty()) {
                Some(p) => p.trim().parse().context("priority must be an integer")?,
                None => 1,
            };
            ScriptStep::Emit(Event::RequestUpdate { viewer, priority })
        }
        "wait" => {
            let ms: u64 = required(&mut args, command, "a duration")?
                .trim()
                .parse()
                .context("wait takes milliseconds")?;
            ScriptStep::Wait(Duration::from_millis(ms))
        }
        "shutdown" => ScriptStep::Emit(Event::Shutdown),
        other => bail!("unknown script command `{other}`"),
    };
    Ok(Some(step))
}

fn required<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    command: &str,
    what: &str,
) -> anyhow::Result<&'a str> {
    args.next()
        .filter(|a| !a.is_empty())
        .with_context(|| format!("`{command}` is missing {what}"))
}

/// Parse a whole script, reporting the first bad line with its number.
pub fn parse_script(source: &str) -> anyhow::Result<Vec<ScriptStep>> {
    let mut steps = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let step = parse_script_line(line).with_context(|| format!("script line {}", index + 1))?;
        steps.extend(step);
    }
    Ok(steps)
}

/// Replays parsed script steps: emits events in order, sleeping on waits.
pub struct ScriptEventSource {
    steps: Vec<ScriptStep>,
}

impl ScriptEventSource {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }
}

impl AsyncEventSource for ScriptEventSource {
    fn name(&self) -> &'static str {
        "script"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let steps = self.steps;
        tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Wait(d) => tokio::time::sleep(d).await,
                    ScriptStep::Emit(event) => {
                        if !send_or_stop(&tx, event, "script").await {
                            return;
                        }
                        SCRIPT_EVENTS_EMITTED.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            tracing::info!(target: "runtime.events", "script finished");
        })
    }
}


#[cfg(test)]
mod tests_async_sources {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    struct MockOnceSource;

    impl AsyncEventSource for MockOnceSource {
        fn name(&self) -> &'static str {
            "mock_once"
        }
        fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
            tokio::spawn(async move {
                let _ = tx.send(Event::ViewerConnected(ViewerId(1))).await;
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn registry_spawns_and_emits() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(MockOnceSource);
        reg.register(TickEventSource::new(Duration::from_millis(10)));
        assert_eq!(reg.len(), 2);
        let handles = reg.spawn_all(&tx);
        assert!(reg.is_empty(), "spawn_all drains the registry");

        let mut got_connect = false;
        let mut got_tick = false;
        while !got_connect || !got_tick {
            match rx.recv().await {
                Some(Event::ViewerConnected(_)) => got_connect = true,
                Some(Event::Tick) => got_tick = true,
                Some(_) => {}
                None => break,
            }
        }
        assert!(got_connect, "expected mock source to emit");
        assert!(got_tick, "expected tick source to emit tick events");

        drop(tx);
        drop(rx);
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_millis(20), handle).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn script_source_honours_waits() {
        let steps = parse_script("connect 1\nwait 500\nupdate 1\nshutdown").unwrap();
        let emitted_before = SCRIPT_EVENTS_EMITTED.load(Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(ScriptEventSource::new(steps));
        let handles = reg.spawn_all(&tx);
        drop(tx);

        let start = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(Event::ViewerConnected(ViewerId(1))));
        assert_eq!(
            rx.recv().await,
            Some(Event::RequestUpdate {
                viewer: ViewerId(1),
                priority: 1
            })
        );
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(rx.recv().await, Some(Event::Shutdown));
        assert_eq!(rx.recv().await, None, "source exits after the last step");
        for handle in handles {
            handle.await.expect("script task should exit cleanly");
        }
        assert!(SCRIPT_EVENTS_EMITTED.load(Ordering::Relaxed) >= emitted_before + 3);
    }

    #[tokio::test]
    async fn script_source_counts_closed_channel() {
        let failures_before = CHANNEL_SEND_FAILURES.load(Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Event>(1);
        drop(rx);
        let source = Box::new(ScriptEventSource::new(vec![
            ScriptStep::Emit(Event::Tick),
            ScriptStep::Emit(Event::Shutdown),
        ]));
        source.spawn(tx).await.expect("script task should exit cleanly");
        assert!(CHANNEL_SEND_FAILURES.load(Ordering::Relaxed) >= failures_before + 1);
    }

    struct MockCloseSource {
        flag: Arc<AtomicBool>,
    }

    impl AsyncEventSource for MockCloseSource {
        fn name(&self) -> &'static str {
            "mock_close"
        }

        fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
            let flag = self.flag;
            tokio::spawn(async move {
                tx.closed().await;
                flag.store(true, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn registry_sources_exit_on_channel_drop() {
        let (tx, rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        let flag = Arc::new(AtomicBool::new(false));
        reg.register(MockCloseSource { flag: flag.clone() });
        reg.register(TickEventSource::new(Duration::from_millis(5)));
        let handles = reg.spawn_all(&tx);

        drop(tx);
        drop(rx);

        for handle in handles {
            match tokio::time::timeout(Duration::from_millis(200), handle).await {
                Ok(join_res) => join_res.expect("source task should exit cleanly"),
                Err(_) => panic!("source task did not observe channel closure"),
            }
        }

        assert!(flag.load(Ordering::SeqCst));
    }
}
