//! Agent control listener
//!
//! Accepts WebSocket connections from agents, runs the authenticate+bind
//! handshake, and drives each live session: a writer task draining the
//! outbound queue, and a read loop dispatching heartbeats and response
//! frames until anything ends the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use uplink_auth::{JwtKeys, TokenKind};
use uplink_proto::{
    BindError, BoundTunnel, ControlCodec, ControlMessage, PROTOCOL_VERSION,
};
use uplink_registry::{RegistryError, TunnelRegistry};

use crate::error::ConnectionError;
use crate::manager::SessionManager;
use crate::pending::StreamEvent;
use crate::session::{AgentSession, BoundRoute};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    pub bind_addr: SocketAddr,
    /// Base domain public URLs are built under (`myapp.<base_domain>`).
    pub base_domain: String,
    /// How long a fresh connection gets to send its `Hello`.
    pub handshake_timeout: Duration,
}

impl ControlServerConfig {
    pub fn new(bind_addr: SocketAddr, base_domain: impl Into<String>) -> Self {
        Self {
            bind_addr,
            base_domain: base_domain.into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ControlServer {
    config: ControlServerConfig,
    manager: Arc<SessionManager>,
    registry: Arc<TunnelRegistry>,
    jwt: Arc<JwtKeys>,
}

impl ControlServer {
    pub fn new(
        config: ControlServerConfig,
        manager: Arc<SessionManager>,
        registry: Arc<TunnelRegistry>,
        jwt: Arc<JwtKeys>,
    ) -> Self {
        Self {
            config,
            manager,
            registry,
            jwt,
        }
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "Control listener started");
        self.serve(listener).await
    }

    /// Serve agent connections on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                debug!(%peer, "Agent connection accepted");
                if let Err(err) = server.handle_connection(stream, peer).await {
                    debug!(%peer, error = %err, "Agent connection ended: {}", err);
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ConnectionError> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut sink, mut source) = ws.split();

        let hello = tokio::time::timeout(
            self.config.handshake_timeout,
            next_control_frame(&mut source),
        )
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;

        let ControlMessage::Hello {
            protocol_version,
            agent_token,
            subdomains,
            agent,
        } = hello
        else {
            return Err(ConnectionError::UnexpectedMessage);
        };

        let (user_id, routes) = match self
            .authorize(protocol_version, &agent_token, &subdomains)
            .await
        {
            Ok(ok) => ok,
            Err(ConnectionError::Rejected(error)) => {
                warn!(%peer, %error, "Agent bind rejected");
                let frame =
                    ControlCodec::encode(&ControlMessage::HelloReject {
                        error: error.clone(),
                    })?;
                let _ = sink.send(Message::Binary(frame.to_vec())).await;
                let _ = sink.close().await;
                return Err(ConnectionError::Rejected(error));
            }
            Err(other) => return Err(other),
        };

        let (session, outbound_rx) = AgentSession::new(user_id, peer, agent, routes);
        let session = Arc::new(session);

        if let Err(error) = self.manager.bind(session.clone()).await {
            warn!(%peer, %error, "Agent bind rejected");
            let frame = ControlCodec::encode(&ControlMessage::HelloReject {
                error: error.clone(),
            })?;
            let _ = sink.send(Message::Binary(frame.to_vec())).await;
            let _ = sink.close().await;
            return Err(ConnectionError::Rejected(error));
        }

        let result = self
            .drive_session(&session, sink, source, outbound_rx)
            .await;
        self.manager.teardown(&session, "connection closed").await;
        result
    }

    /// Validate the handshake and resolve each requested subdomain to one
    /// of the token owner's tunnels. All-or-nothing: the first failure
    /// rejects the whole connection.
    async fn authorize(
        &self,
        protocol_version: u16,
        agent_token: &str,
        subdomains: &[String],
    ) -> Result<(Uuid, Vec<BoundRoute>), ConnectionError> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(ConnectionError::Rejected(
                BindError::UnsupportedProtocolVersion {
                    server: PROTOCOL_VERSION,
                    agent: protocol_version,
                },
            ));
        }
        if subdomains.is_empty() {
            return Err(ConnectionError::Rejected(BindError::NoTunnelsRequested));
        }

        let claims = self
            .jwt
            .validate(agent_token, TokenKind::Agent)
            .map_err(|_| ConnectionError::Rejected(BindError::InvalidToken))?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ConnectionError::Rejected(BindError::InvalidToken))?;

        let mut routes = Vec::with_capacity(subdomains.len());
        for subdomain in subdomains {
            let tunnel = match self
                .registry
                .get_tunnel_by_subdomain(user_id, subdomain)
                .await
            {
                Ok(tunnel) => tunnel,
                Err(RegistryError::NotFound) => {
                    return Err(ConnectionError::Rejected(BindError::TunnelNotFound {
                        subdomain: subdomain.clone(),
                    }))
                }
                Err(err) => return Err(err.into()),
            };
            routes.push(BoundRoute {
                tunnel_id: tunnel.id,
                subdomain: tunnel.subdomain.clone(),
                local_port: tunnel.local_port as u16,
                public_url: format!("http://{}.{}", tunnel.subdomain, self.config.base_domain),
            });
        }
        Ok((user_id, routes))
    }

    async fn drive_session(
        &self,
        session: &Arc<AgentSession>,
        mut sink: WsSink,
        mut source: WsSource,
        mut outbound_rx: mpsc::Receiver<ControlMessage>,
    ) -> Result<(), ConnectionError> {
        let ack = ControlCodec::encode(&ControlMessage::HelloAck {
            session_id: session.id.to_string(),
            tunnels: session
                .routes()
                .iter()
                .map(|r| BoundTunnel {
                    subdomain: r.subdomain.clone(),
                    local_port: r.local_port,
                    public_url: r.public_url.clone(),
                })
                .collect(),
        })?;
        sink.send(Message::Binary(ack.to_vec())).await?;

        // Writer task: drains the outbound queue until the session is
        // cancelled or the socket goes away.
        let cancel = session.cancel_token().clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        let frame = match ControlCodec::encode(&msg) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(error = %err, "Failed to encode outbound frame");
                                continue;
                            }
                        };
                        if sink.send(Message::Binary(frame.to_vec())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let result = self.read_loop(session, &mut source).await;
        // Teardown (in the caller) cancels the token; make sure the writer
        // is gone before the sink's socket half is dropped.
        session.cancel_token().cancel();
        let _ = writer.await;
        result
    }

    async fn read_loop(
        &self,
        session: &Arc<AgentSession>,
        source: &mut WsSource,
    ) -> Result<(), ConnectionError> {
        let cancel = session.cancel_token().clone();
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = source.next() => frame,
            };
            let Some(frame) = frame else { return Ok(()) };
            let data = match frame? {
                Message::Binary(data) => data,
                Message::Close(_) => return Ok(()),
                // Transport-level ping/pong and text frames are ignored
                _ => continue,
            };

            match ControlCodec::decode(&data)? {
                ControlMessage::Ping { seq, timestamp } => {
                    session.touch();
                    let _ = session.send(ControlMessage::Pong { seq, timestamp }).await;
                }
                ControlMessage::HttpResponse {
                    stream_id,
                    status,
                    headers,
                } => {
                    let delivered = session
                        .pending()
                        .dispatch(stream_id, StreamEvent::Head { status, headers })
                        .await;
                    if !delivered {
                        // Client went away; cancel the stream agent-side
                        let _ = session.send(ControlMessage::StreamClose { stream_id }).await;
                    }
                }
                ControlMessage::HttpResponseChunk {
                    stream_id,
                    data,
                    is_final,
                } => {
                    let delivered = session
                        .pending()
                        .dispatch(
                            stream_id,
                            StreamEvent::Chunk {
                                data: Bytes::from(data),
                                is_final,
                            },
                        )
                        .await;
                    if !delivered && !is_final {
                        let _ = session.send(ControlMessage::StreamClose { stream_id }).await;
                    }
                }
                ControlMessage::StreamError { stream_id, message } => {
                    session
                        .pending()
                        .dispatch(stream_id, StreamEvent::Error { message })
                        .await;
                }
                ControlMessage::StreamClose { stream_id } => {
                    session
                        .pending()
                        .dispatch(
                            stream_id,
                            StreamEvent::Error {
                                message: "stream closed by agent".to_string(),
                            },
                        )
                        .await;
                }
                ControlMessage::Goodbye { reason } => {
                    debug!(session_id = %session.id, ?reason, "Agent said goodbye");
                    return Ok(());
                }
                _ => {
                    warn!(session_id = %session.id, "Unexpected message on live session");
                    return Err(ConnectionError::UnexpectedMessage);
                }
            }
        }
    }
}

async fn next_control_frame(source: &mut WsSource) -> Result<ControlMessage, ConnectionError> {
    loop {
        match source.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(ControlCodec::decode(&data)?),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ConnectionError::ClosedDuringHandshake)
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectOptions, Database};
    use uplink_db::entities::user;
    use uplink_db::{Migrator, MigratorTrait};
    use uplink_proto::AgentInfo;

    struct TestRelay {
        addr: SocketAddr,
        manager: Arc<SessionManager>,
        jwt: Arc<JwtKeys>,
        user_id: Uuid,
    }

    async fn start_relay() -> TestRelay {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1);
        let db = Database::connect(opts).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let user_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        use sea_orm::{ActiveModelTrait, Set};
        user::ActiveModel {
            id: Set(user_id),
            email: Set(format!("{}@example.com", user_id)),
            name: Set("Agent Owner".to_string()),
            password_hash: Set("unused".to_string()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();

        let registry = Arc::new(TunnelRegistry::new(db));
        registry
            .create_tunnel(user_id, "web", "myapp", 3000)
            .await
            .unwrap();

        let manager = Arc::new(SessionManager::new(registry.clone()));
        let jwt = Arc::new(JwtKeys::new(b"test-secret"));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ControlServer::new(
            ControlServerConfig::new(addr, "uplink.test"),
            manager.clone(),
            registry,
            jwt.clone(),
        );
        tokio::spawn(server.serve(listener));

        TestRelay {
            addr,
            manager,
            jwt,
            user_id,
        }
    }

    async fn connect(
        addr: SocketAddr,
    ) -> WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        ws
    }

    async fn send_msg<S>(ws: &mut S, msg: &ControlMessage)
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::fmt::Debug,
    {
        let frame = ControlCodec::encode(msg).unwrap();
        ws.send(Message::Binary(frame.to_vec())).await.unwrap();
    }

    async fn recv_msg<S>(ws: &mut S) -> ControlMessage
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Binary(data) => return ControlCodec::decode(&data).unwrap(),
                _ => continue,
            }
        }
    }

    fn hello(token: &str, subdomains: &[&str]) -> ControlMessage {
        ControlMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            agent_token: token.to_string(),
            subdomains: subdomains.iter().map(|s| s.to_string()).collect(),
            agent: AgentInfo::default(),
        }
    }

    #[tokio::test]
    async fn test_handshake_and_heartbeat() {
        let relay = start_relay().await;
        let token = relay.jwt.issue_agent(&relay.user_id.to_string()).unwrap();

        let mut ws = connect(relay.addr).await;
        send_msg(&mut ws, &hello(&token, &["myapp"])).await;

        match recv_msg(&mut ws).await {
            ControlMessage::HelloAck { tunnels, .. } => {
                assert_eq!(tunnels.len(), 1);
                assert_eq!(tunnels[0].subdomain, "myapp");
                assert_eq!(tunnels[0].public_url, "http://myapp.uplink.test");
            }
            other => panic!("expected HelloAck, got {:?}", other),
        }
        assert!(relay.manager.resolve("myapp").is_some());

        send_msg(
            &mut ws,
            &ControlMessage::Ping {
                seq: 3,
                timestamp: 42,
            },
        )
        .await;
        match recv_msg(&mut ws).await {
            ControlMessage::Pong { seq, timestamp } => {
                assert_eq!(seq, 3);
                assert_eq!(timestamp, 42);
            }
            other => panic!("expected Pong, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let relay = start_relay().await;
        let mut ws = connect(relay.addr).await;
        send_msg(&mut ws, &hello("not-a-jwt", &["myapp"])).await;

        match recv_msg(&mut ws).await {
            ControlMessage::HelloReject { error } => {
                assert!(matches!(error, BindError::InvalidToken));
            }
            other => panic!("expected HelloReject, got {:?}", other),
        }
        assert!(relay.manager.resolve("myapp").is_none());
    }

    #[tokio::test]
    async fn test_unknown_subdomain_rejected() {
        let relay = start_relay().await;
        let token = relay.jwt.issue_agent(&relay.user_id.to_string()).unwrap();

        let mut ws = connect(relay.addr).await;
        send_msg(&mut ws, &hello(&token, &["ghost"])).await;

        match recv_msg(&mut ws).await {
            ControlMessage::HelloReject { error } => {
                assert!(matches!(
                    error,
                    BindError::TunnelNotFound { ref subdomain } if subdomain == "ghost"
                ));
            }
            other => panic!("expected HelloReject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_bind_rejected_original_untouched() {
        let relay = start_relay().await;
        let token = relay.jwt.issue_agent(&relay.user_id.to_string()).unwrap();

        let mut first = connect(relay.addr).await;
        send_msg(&mut first, &hello(&token, &["myapp"])).await;
        assert!(matches!(
            recv_msg(&mut first).await,
            ControlMessage::HelloAck { .. }
        ));

        let mut second = connect(relay.addr).await;
        send_msg(&mut second, &hello(&token, &["myapp"])).await;
        match recv_msg(&mut second).await {
            ControlMessage::HelloReject { error } => {
                assert!(matches!(error, BindError::TunnelAlreadyLive { .. }));
            }
            other => panic!("expected HelloReject, got {:?}", other),
        }

        // First session still answers heartbeats
        send_msg(
            &mut first,
            &ControlMessage::Ping {
                seq: 1,
                timestamp: 0,
            },
        )
        .await;
        assert!(matches!(
            recv_msg(&mut first).await,
            ControlMessage::Pong { .. }
        ));
    }

    #[tokio::test]
    async fn test_goodbye_frees_subdomain() {
        let relay = start_relay().await;
        let token = relay.jwt.issue_agent(&relay.user_id.to_string()).unwrap();

        let mut ws = connect(relay.addr).await;
        send_msg(&mut ws, &hello(&token, &["myapp"])).await;
        assert!(matches!(
            recv_msg(&mut ws).await,
            ControlMessage::HelloAck { .. }
        ));

        send_msg(&mut ws, &ControlMessage::Goodbye { reason: None }).await;

        // Teardown is asynchronous relative to this client; poll briefly
        for _ in 0..50 {
            if relay.manager.resolve("myapp").is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subdomain still resolvable after Goodbye");
    }
}
