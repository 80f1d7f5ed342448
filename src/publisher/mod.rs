//! Change publisher implementations.
//!
//! Storage engines call [`ChangePublisher::publish`] right after a mutation
//! commits. [`ChannelPublisher`] only enqueues into a bounded channel; a
//! background task drains it into a [`ChangeSink`], so a slow or failing
//! fan-out never adds latency to the write path.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::interfaces::{ChangeEvent, ChangePublisher, EventKind, PublishError};

pub mod mock;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Publisher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Events buffered before `publish` starts rejecting.
    pub capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Downstream receiver of change events (the real-time fan-out).
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn deliver(&self, event: ChangeEvent) -> Result<(), PublishError>;
}

/// Bounded queue drained by a background consumer task.
pub struct ChannelPublisher {
    sender: mpsc::Sender<ChangeEvent>,
}

impl ChannelPublisher {
    /// Create the publisher and spawn its consumer on the current runtime.
    ///
    /// The consumer stops once every clone of the publisher is dropped and
    /// the queue is drained.
    pub fn spawn(config: &PublisherConfig, sink: Arc<dyn ChangeSink>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<ChangeEvent>(config.capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let channel = event.channel.clone();
                let kind = event.kind;
                if let Err(e) = sink.deliver(event).await {
                    warn!(channel = %channel, kind = %kind, error = %e, "Change delivery failed");
                }
            }
            info!("Change publisher queue closed, stopping consumer");
        });

        info!(capacity = config.capacity, "Change publisher started");

        (Self { sender }, handle)
    }
}

impl ChangePublisher for ChannelPublisher {
    fn publish(&self, channel: &str, kind: EventKind, payload: Value) -> Result<(), PublishError> {
        let event = ChangeEvent {
            channel: channel.to_string(),
            kind,
            payload,
        };
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })?;
        debug!(channel = %channel, kind = %kind, "Change event queued");
        Ok(())
    }
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Subscribers that fall behind lose the oldest events.
pub struct BroadcastSink {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ChangeSink for BroadcastSink {
    async fn deliver(&self, event: ChangeEvent) -> Result<(), PublishError> {
        // No subscribers is not a failure.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl ChangePublisher for NoopPublisher {
    fn publish(&self, _channel: &str, _kind: EventKind, _payload: Value) -> Result<(), PublishError> {
        Ok(())
    }
}
