use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::sensor::Reading;

/// What the message feed sees: human-readable trace lines plus the raw
/// reading/error stream, the same mix the console view displays.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Trace(String),
    Reading(Reading),
    Error(String),
}

/// Display-side collaborator. Implementations must return without blocking;
/// the polling and decision paths call this inline.
pub trait MessageSink: Send + Sync {
    fn publish(&self, event: FeedEvent);
}

/// Feeds events into an mpsc channel without ever waiting on the consumer.
/// A full channel drops the event; a slow display must not stall polling.
pub struct ChannelSink {
    tx: mpsc::Sender<FeedEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<FeedEvent>) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelSink {
    fn publish(&self, event: FeedEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Message feed full, dropping {:?}", event);
            }
            // Consumer is gone; nothing left to display to.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
