// Headless media — terminal stand-ins for capture devices and video elements

use async_trait::async_trait;
use colored::*;
use confsignal_core::{CapabilityError, MediaDevices, MediaElement, MediaStream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Prints what would be rendered instead of rendering it
pub struct ConsoleElement {
    label: String,
    track: Mutex<Option<String>>,
}

impl ConsoleElement {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            track: Mutex::new(None),
        }
    }
}

impl MediaElement for ConsoleElement {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn attach(&self, track_id: &str) {
        *self.track.lock() = Some(track_id.to_string());
        println!("\n{} Rendering {} ({})", "▶".bright_green(), self.label.bright_cyan(), track_id.dimmed());
    }

    fn detach(&self) {
        if self.track.lock().take().is_some() {
            println!("\n{} Stopped rendering {}", "■".bright_red(), self.label.bright_cyan());
        } else {
            debug!("Detached idle element {}", self.label);
        }
    }
}

pub struct HeadlessMedia {
    capture_enabled: bool,
    local: Arc<ConsoleElement>,
    remote: Mutex<HashMap<String, Arc<ConsoleElement>>>,
}

impl HeadlessMedia {
    pub fn new(capture_enabled: bool) -> Self {
        Self {
            capture_enabled,
            local: Arc::new(ConsoleElement::new("local preview")),
            remote: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MediaDevices for HeadlessMedia {
    async fn acquire_local(&self) -> Result<MediaStream, CapabilityError> {
        if !self.capture_enabled {
            return Err(CapabilityError::Unavailable(
                "capture disabled (confsig config set capture_enabled true)".into(),
            ));
        }
        Ok(MediaStream::video("headless-screen"))
    }

    fn local_element(&self) -> Option<Arc<dyn MediaElement>> {
        let local: Arc<dyn MediaElement> = self.local.clone();
        Some(local)
    }

    fn remote_element(&self, identity: &str) -> Arc<dyn MediaElement> {
        let element = self
            .remote
            .lock()
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(ConsoleElement::new(identity)))
            .clone();
        element
    }
}
