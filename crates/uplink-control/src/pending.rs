//! In-flight proxied stream tracker
//!
//! Maps stream IDs to the channel of the router task waiting on each
//! proxied request, so response frames arriving on the control connection
//! can be routed back to the right waiter.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-stream channel depth. Backpressures the control-connection read
/// loop when a client consumes a response slower than the agent sends it.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// One event on a proxied stream, as seen by the waiting router task.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Response head from the agent.
    Head {
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// Response body chunk. `is_final` ends the stream.
    Chunk { data: Bytes, is_final: bool },
    /// Terminal failure; no further events follow.
    Error { message: String },
}

impl StreamEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Error { .. } | StreamEvent::Chunk { is_final: true, .. }
        )
    }
}

/// Tracks proxied requests in flight on one agent session.
#[derive(Clone)]
pub struct PendingStreams {
    streams: Arc<DashMap<u32, mpsc::Sender<StreamEvent>>>,
}

impl PendingStreams {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
        }
    }

    /// Register a new stream and return the receiver the router task
    /// awaits events on.
    pub fn register(&self, stream_id: u32) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        self.streams.insert(stream_id, tx);
        debug!(stream_id, "Registered pending stream");
        rx
    }

    /// Deliver an event to the stream's waiter.
    ///
    /// Terminal events remove the stream. Returns false when no waiter is
    /// left (unknown stream, or the client already disconnected), in which
    /// case the caller should cancel the stream toward the agent.
    pub async fn dispatch(&self, stream_id: u32, event: StreamEvent) -> bool {
        let terminal = event.is_terminal();
        let Some(tx) = self.streams.get(&stream_id).map(|entry| entry.clone()) else {
            debug!(stream_id, "Dropping event for unknown stream");
            return false;
        };

        let delivered = tx.send(event).await.is_ok();
        if terminal || !delivered {
            self.streams.remove(&stream_id);
        }
        if !delivered {
            debug!(stream_id, "Stream waiter gone, dropping event");
        }
        delivered
    }

    /// Drop a stream without delivering anything further.
    pub fn remove(&self, stream_id: u32) {
        if self.streams.remove(&stream_id).is_some() {
            debug!(stream_id, "Removed pending stream");
        }
    }

    /// Fail every in-flight stream with a terminal error. Used on session
    /// teardown so no router task is left waiting.
    pub fn fail_all(&self, message: &str) {
        let count = self.streams.len();
        if count > 0 {
            warn!(count, "Failing all pending streams: {}", message);
        }
        for entry in self.streams.iter() {
            // Best effort: a full channel means the waiter is draining a
            // body and will see the channel close instead.
            let _ = entry.value().try_send(StreamEvent::Error {
                message: message.to_string(),
            });
        }
        self.streams.clear();
    }

    pub fn count(&self) -> usize {
        self.streams.len()
    }
}

impl Default for PendingStreams {
    fn default() -> Self {
        Self::new()
    }
}
