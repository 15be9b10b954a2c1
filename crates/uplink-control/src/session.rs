//! Live agent session state

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use uplink_proto::{AgentInfo, ControlMessage, StreamIds};

use crate::pending::{PendingStreams, StreamEvent};

/// Depth of the outbound frame queue toward the agent.
const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Error)]
#[error("session is closed")]
pub struct SessionSendError;

/// A tunnel bound to a live session.
#[derive(Debug, Clone)]
pub struct BoundRoute {
    pub tunnel_id: Uuid,
    pub subdomain: String,
    pub local_port: u16,
    pub public_url: String,
}

/// State of one connected agent.
///
/// Created during the handshake, published to the route table on a
/// successful bind, and torn down exactly once whatever ends the
/// connection first (Goodbye, EOF, transport error, heartbeat timeout,
/// tunnel deletion).
pub struct AgentSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub peer_addr: SocketAddr,
    pub agent: AgentInfo,
    routes: Vec<BoundRoute>,
    outbound: mpsc::Sender<ControlMessage>,
    streams: StreamIds,
    pending: PendingStreams,
    last_heartbeat: Mutex<Instant>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl AgentSession {
    /// Create a session and the receiving half of its outbound queue
    /// (owned by the connection's writer task).
    pub fn new(
        user_id: Uuid,
        peer_addr: SocketAddr,
        agent: AgentInfo,
        routes: Vec<BoundRoute>,
    ) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Self {
            id: Uuid::new_v4(),
            user_id,
            peer_addr,
            agent,
            routes,
            outbound,
            streams: StreamIds::new(),
            pending: PendingStreams::new(),
            last_heartbeat: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };
        (session, rx)
    }

    pub fn routes(&self) -> &[BoundRoute] {
        &self.routes
    }

    pub fn pending(&self) -> &PendingStreams {
        &self.pending
    }

    /// Queue a frame toward the agent.
    pub async fn send(&self, msg: ControlMessage) -> Result<(), SessionSendError> {
        if self.is_closed() {
            return Err(SessionSendError);
        }
        self.outbound.send(msg).await.map_err(|_| SessionSendError)
    }

    /// Queue a frame without waiting for queue space. For callers that
    /// cannot suspend (drop paths); a full queue drops the frame.
    pub fn try_send(&self, msg: ControlMessage) -> Result<(), SessionSendError> {
        if self.is_closed() {
            return Err(SessionSendError);
        }
        self.outbound.try_send(msg).map_err(|_| SessionSendError)
    }

    /// Allocate a stream ID and register a waiter for its response
    /// events. Used by the router to start a proxied request.
    pub fn open_stream(&self) -> (u32, mpsc::Receiver<StreamEvent>) {
        let stream_id = self.streams.next();
        let rx = self.pending.register(stream_id);
        (stream_id, rx)
    }

    /// Stamp the heartbeat clock. Called on every `Ping`.
    pub fn touch(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    /// Time since the last heartbeat (or since connect).
    pub fn idle_for(&self) -> Duration {
        self.last_heartbeat.lock().unwrap().elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the session closed. Returns true for exactly one caller, which
    /// then runs the rest of the teardown.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> (AgentSession, mpsc::Receiver<ControlMessage>) {
        AgentSession::new(
            Uuid::new_v4(),
            "203.0.113.5:40000".parse().unwrap(),
            AgentInfo::default(),
            vec![BoundRoute {
                tunnel_id: Uuid::new_v4(),
                subdomain: "myapp".to_string(),
                local_port: 3000,
                public_url: "http://myapp.uplink.test".to_string(),
            }],
        )
    }

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (session, mut rx) = test_session();
        session
            .send(ControlMessage::Pong {
                seq: 1,
                timestamp: 0,
            })
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ControlMessage::Pong { seq: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_send_fails_after_close() {
        let (session, _rx) = test_session();
        assert!(session.begin_close());
        assert!(session.send(ControlMessage::Goodbye { reason: None }).await.is_err());
    }

    #[tokio::test]
    async fn test_begin_close_single_winner() {
        let (session, _rx) = test_session();
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_clock_resets_on_touch() {
        let (session, _rx) = test_session();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(session.idle_for() >= Duration::from_secs(10));

        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_open_stream_unique_ids() {
        let (session, _rx) = test_session();
        let (a, _rx_a) = session.open_stream();
        let (b, _rx_b) = session.open_stream();
        assert_ne!(a, b);
        assert_eq!(session.pending().count(), 2);
    }
}
