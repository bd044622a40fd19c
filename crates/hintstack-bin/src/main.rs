//! hintstack entrypoint.
//!
//! Drives one display pipeline per connected viewer from a stream of runtime
//! events. Without a real network layer the events come from a script (or
//! the built-in demo) and composed displays are printed to stdout.
use anyhow::{Context, Result};
use clap::Parser;
use core_compose::ElementRef;
use core_display::{
    Display, DisplayCommand, DisplayHandle, DisplayOptions, Transport, ViewerId, spawn_display,
};
use core_events::{
    EVENT_CHANNEL_CAP, Event, EventSourceRegistry, ScriptEventSource, ScriptStep,
    TickEventSource, parse_script,
};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// Interval of the housekeeping tick (reaps display tasks that stopped).
const TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "hintstack", version, about = "Layered rich-text hint displays")]
struct Args {
    /// Optional configuration file path (overrides discovery of `hintstack.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Event script to replay. If omitted the built-in demo runs.
    #[arg(long = "script")]
    pub script: Option<PathBuf>,
    /// Number of viewers the built-in demo connects.
    #[arg(long = "viewers", default_value_t = 1)]
    pub viewers: u64,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("hintstack.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "hintstack.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global tracing subscriber already installed; drop guard so writer shuts down.
            }
        }

        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Prints each composed display to stdout.
struct StdoutTransport;

impl Transport for StdoutTransport {
    fn send(&mut self, viewer: ViewerId, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "--- {viewer} ({} bytes)", text.len())?;
        writeln!(out, "{text}")?;
        out.flush()?;
        Ok(())
    }
}

type TransportFactory = Box<dyn Fn(ViewerId) -> Box<dyn Transport> + Send>;

fn demo_script(viewers: u64) -> String {
    let mut script = String::new();
    for v in 1..=viewers {
        script.push_str(&format!(
            "connect {v}\n\
             set {v} title 900 <size=150%><b>hintstack</b></size>\n\
             set {v} hint 300 Welcome, <color=#ffcc00>viewer {v}</color>!\\nThis line sits below.\n\
             update {v}\n"
        ));
    }
    script.push_str("wait 200\n");
    for v in 1..=viewers {
        script.push_str(&format!(
            "set {v} hint 300 <smallcaps>Hints</smallcaps> coalesce: <noparse><b></noparse> stays literal.\n\
             update {v} 2\n"
        ));
    }
    script.push_str("wait 1500\nshutdown\n");
    script
}

/// Load script steps, making sure the run ends: a script without a trailing
/// `shutdown` gets one after enough time for pending flushes to land.
fn load_steps(args: &Args, options: &DisplayOptions) -> Result<Vec<ScriptStep>> {
    let source = match args.script.as_ref() {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?,
        None => demo_script(args.viewers.max(1)),
    };
    let mut steps = parse_script(&source)?;
    if steps.last() != Some(&ScriptStep::Emit(Event::Shutdown)) {
        steps.push(ScriptStep::Wait(options.rate_limit + options.batch_window));
        steps.push(ScriptStep::Emit(Event::Shutdown));
    }
    Ok(steps)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownReason {
    ShutdownEvent,
    ChannelClosed,
}

impl ShutdownReason {
    fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::ShutdownEvent => "shutdown_event",
            ShutdownReason::ChannelClosed => "channel_closed",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn log_shutdown_stage(reason: ShutdownReason, stage: &'static str) {
    info!(
        target: "runtime.shutdown",
        reason = reason.as_str(),
        stage = stage,
        "shutdown_stage"
    );
}

/// Owns the viewer -> display task map and routes events to it.
struct HintRuntime {
    options: DisplayOptions,
    transports: TransportFactory,
    displays: HashMap<ViewerId, DisplayHandle>,
    /// Slot names from events resolve to one element reference each.
    slots: HashMap<String, ElementRef>,
    rx: mpsc::Receiver<Event>,
    tx: Option<mpsc::Sender<Event>>,
    source_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl HintRuntime {
    fn new(
        options: DisplayOptions,
        transports: TransportFactory,
        tx: mpsc::Sender<Event>,
        rx: mpsc::Receiver<Event>,
        source_handles: Vec<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self {
            options,
            transports,
            displays: HashMap::new(),
            slots: HashMap::new(),
            rx,
            tx: Some(tx),
            source_handles,
        }
    }

    async fn run(&mut self) -> Result<()> {
        let span = tracing::debug_span!(target: "runtime", "event_loop");
        let _enter_loop = span.enter();

        let mut shutdown_reason = ShutdownReason::ChannelClosed;
        while let Some(event) = self.rx.recv().await {
            trace!(target: "runtime.events", ?event, "event");
            match event {
                Event::ViewerConnected(viewer) => self.connect(viewer),
                Event::ViewerDisconnected(viewer) => self.disconnect(viewer).await,
                Event::SetContent {
                    viewer,
                    slot,
                    position,
                    text,
                } => {
                    let reference = self.slot_ref(slot);
                    let command = DisplayCommand::SetContent {
                        reference,
                        position,
                        text,
                    };
                    self.forward(viewer, command).await;
                }
                Event::RequestUpdate { viewer, priority } => {
                    self.forward(viewer, DisplayCommand::RequestUpdate { priority })
                        .await
                }
                Event::Tick => self.reap_finished().await,
                Event::Shutdown => {
                    shutdown_reason = ShutdownReason::ShutdownEvent;
                    break;
                }
            }
        }

        self.rx.close();
        self.finalize_shutdown(shutdown_reason).await;
        Ok(())
    }

    fn slot_ref(&mut self, slot: String) -> ElementRef {
        *self.slots.entry(slot).or_insert_with(ElementRef::mint)
    }

    fn connect(&mut self, viewer: ViewerId) {
        if self.displays.contains_key(&viewer) {
            warn!(target: "runtime.viewers", %viewer, "viewer_already_connected");
            return;
        }
        let transport = (self.transports)(viewer);
        let display = Display::with_options(viewer, transport, self.options);
        self.displays.insert(viewer, spawn_display(display));
        info!(target: "runtime.viewers", %viewer, viewers = self.displays.len(), "viewer_connected");
    }

    async fn disconnect(&mut self, viewer: ViewerId) {
        let Some(handle) = self.displays.remove(&viewer) else {
            warn!(target: "runtime.viewers", %viewer, "unknown_viewer_disconnect");
            return;
        };
        Self::stop_display(viewer, handle).await;
        info!(target: "runtime.viewers", %viewer, viewers = self.displays.len(), "viewer_disconnected");
    }

    async fn stop_display(viewer: ViewerId, handle: DisplayHandle) {
        match handle.shutdown().await {
            Ok(stats) => debug!(
                target: "runtime.viewers",
                %viewer,
                flushes = stats.flushes,
                jobs = stats.jobs_executed,
                failures = stats.job_failures,
                "display_stopped"
            ),
            Err(err) => error!(target: "runtime.viewers", %viewer, error = %format!("{err:#}"), "display_failed"),
        }
    }

    async fn forward(&mut self, viewer: ViewerId, command: DisplayCommand) {
        let Some(handle) = self.displays.get(&viewer) else {
            warn!(target: "runtime.viewers", %viewer, "event_for_unknown_viewer");
            return;
        };
        if handle.send(command).await.is_err() {
            // The task already ended; collect its result now.
            if let Some(handle) = self.displays.remove(&viewer) {
                Self::stop_display(viewer, handle).await;
            }
        }
    }

    async fn reap_finished(&mut self) {
        let finished: Vec<ViewerId> = self
            .displays
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(v, _)| *v)
            .collect();
        for viewer in finished {
            if let Some(handle) = self.displays.remove(&viewer) {
                Self::stop_display(viewer, handle).await;
            }
        }
    }

    async fn finalize_shutdown(&mut self, reason: ShutdownReason) {
        log_shutdown_stage(reason, "begin");
        if let Some(tx) = self.tx.take() {
            trace!(
                target: "runtime.shutdown",
                reason = reason.as_str(),
                "dropping_runtime_sender"
            );
            drop(tx);
        }

        let mut viewers: Vec<ViewerId> = self.displays.keys().copied().collect();
        viewers.sort();
        for viewer in viewers {
            if let Some(handle) = self.displays.remove(&viewer) {
                Self::stop_display(viewer, handle).await;
            }
        }

        while let Some(handle) = self.source_handles.pop() {
            match tokio::time::timeout(Duration::from_millis(200), handle).await {
                Ok(Ok(_)) => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_stopped"
                ),
                Ok(Err(err)) if err.is_cancelled() => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_cancelled"
                ),
                Ok(Err(err)) => error!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    ?err,
                    "event_source_task_error"
                ),
                Err(_) => warn!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_timeout"
                ),
            }
        }
        log_shutdown_stage(reason, "complete");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let args = Args::parse();
    let config = core_config::load_from(args.config.clone())?;
    let options = DisplayOptions::from_config(&config);
    info!(
        target: "runtime.startup",
        config_override = args.config.is_some(),
        script = args.script.as_ref().map(|p| p.display().to_string()).as_deref(),
        rate_limit_ms = options.rate_limit.as_millis() as u64,
        batch_window_ms = options.batch_window.as_millis() as u64,
        "bootstrap_complete"
    );
    let steps = load_steps(&args, &options)?;

    let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(TICK_INTERVAL));
    registry.register(ScriptEventSource::new(steps));
    let source_handles = registry.spawn_all(&tx);

    let transports: TransportFactory = Box::new(|_| Box::new(StdoutTransport));
    let mut runtime = HintRuntime::new(options, transports, tx, rx, source_handles);
    runtime.run().await
}
