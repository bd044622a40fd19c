//! Delivery of composed markup to a viewer.

use std::sync::{Arc, Mutex};

use core_events::ViewerId;

/// Delivers one composed string, replacing whatever the viewer showed before.
pub trait Transport: Send + 'static {
    fn send(&mut self, viewer: ViewerId, text: &str) -> anyhow::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, viewer: ViewerId, text: &str) -> anyhow::Result<()> {
        (**self).send(viewer, text)
    }
}

/// Keeps every sent string. Clones share the same log, so a test can hold one
/// clone while a display task owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(ViewerId, String)>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ViewerId, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<String> {
        self.sent
            .lock()
            .ok()
            .and_then(|s| s.last().map(|(_, text)| text.clone()))
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, viewer: ViewerId, text: &str) -> anyhow::Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| anyhow::anyhow!("recording transport poisoned"))?;
        sent.push((viewer, text.to_string()));
        Ok(())
    }
}
