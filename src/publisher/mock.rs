//! Recording publisher for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use crate::interfaces::{ChangeEvent, ChangePublisher, EventKind, PublishError};

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ChangeEvent>>,
    fail_on_publish: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `publish` fail after recording.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_for(&self, channel: &str) -> Vec<ChangeEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.channel == channel)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl ChangePublisher for RecordingPublisher {
    fn publish(&self, channel: &str, kind: EventKind, payload: Value) -> Result<(), PublishError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(ChangeEvent {
                channel: channel.to_string(),
                kind,
                payload,
            });
        }
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(PublishError::Other("recording publisher set to fail".to_string()));
        }
        Ok(())
    }
}
