//! Per-viewer display pipeline.
//!
//! `Display` ties one viewer's elements to its scheduler and transport:
//! callers mutate elements and request updates, and `poll` turns due batches
//! into composed markup sent through the `Transport`. `runtime` runs a
//! display on its own tokio task.

pub mod display;
pub mod runtime;
pub mod transport;

pub use core_events::ViewerId;
pub use display::{Display, DisplayOptions, FlushReport};
pub use runtime::{DISPLAY_COMMAND_CAP, DisplayCommand, DisplayHandle, DisplayStats, spawn_display};
pub use transport::{RecordingTransport, Transport};
