//! Change publisher hook.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Kind of document mutation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "db_created")]
    Created,
    #[serde(rename = "db_updated")]
    Updated,
    #[serde(rename = "db_deleted")]
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "db_created",
            EventKind::Updated => "db_updated",
            EventKind::Deleted => "db_deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation notification handed to the real-time fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub channel: String,
    pub kind: EventKind,
    pub payload: Value,
}

/// Errors raised while handing off a change event.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Change queue is full")]
    QueueFull,

    #[error("Change queue is closed")]
    Closed,

    #[error("Publish failed: {0}")]
    Other(String),
}

/// Receives change events right after a mutation commits.
///
/// Implementations enqueue and return; they must not wait on delivery.
/// Storage engines log any error and never fail the mutation because of it.
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, channel: &str, kind: EventKind, payload: Value) -> Result<(), PublishError>;
}
