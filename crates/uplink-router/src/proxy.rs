//! Request forwarding through live agent sessions

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use uplink_control::{AgentSession, SessionManager, StreamEvent};
use uplink_proto::ControlMessage;

use crate::host::{classify_host, HostMatch};

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Not Found</title></head>\n<body>\n<h1>404 Not Found</h1>\n<p>This address is not served by this relay.</p>\n</body>\n</html>\n";

const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Tunnel Offline</title></head>\n<body>\n<h1>503 Tunnel Offline</h1>\n<p>The tunnel <strong>{subdomain}</strong> exists but no agent is currently connected for it.</p>\n<p>Start the agent on the machine that serves this tunnel and reload.</p>\n</body>\n</html>\n";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    /// Domain tunnel hosts hang under (`<subdomain>.<base_domain>`).
    pub base_domain: String,
    /// Max wait for the response head from the agent.
    pub response_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(bind_addr: SocketAddr, base_domain: impl Into<String>) -> Self {
        Self {
            bind_addr,
            base_domain: base_domain.into(),
            response_timeout: Duration::from_secs(30),
        }
    }
}

struct ProxyState {
    manager: Arc<SessionManager>,
    base_domain: String,
    response_timeout: Duration,
}

/// The internet-facing HTTP server.
pub struct PublicServer {
    config: ProxyConfig,
    manager: Arc<SessionManager>,
}

impl PublicServer {
    pub fn new(config: ProxyConfig, manager: Arc<SessionManager>) -> Self {
        Self { config, manager }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(ProxyState {
            manager: self.manager.clone(),
            base_domain: self.config.base_domain.clone(),
            response_timeout: self.config.response_timeout,
        });
        Router::new().fallback(proxy_request).with_state(state)
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, base_domain = %self.config.base_domain, "Public server started");
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}

async fn proxy_request(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let subdomain = match classify_host(host, &state.base_domain) {
        HostMatch::Tunnel(subdomain) => subdomain,
        HostMatch::BaseDomain | HostMatch::Unknown => return not_found_response(),
    };

    // Hot path: in-memory lookup, no registry round trip
    let Some(session) = state.manager.resolve(&subdomain) else {
        return offline_response(&subdomain);
    };

    forward(&state, session, subdomain, req).await
}

async fn forward(
    state: &ProxyState,
    session: Arc<AgentSession>,
    subdomain: String,
    req: Request,
) -> Response {
    let method = req.method().to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let mut headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    if let Some(ip) = peer_ip {
        match headers
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case("x-forwarded-for"))
        {
            Some((_, value)) => {
                value.push_str(", ");
                value.push_str(&ip);
            }
            None => headers.push(("x-forwarded-for".to_string(), ip)),
        }
    }

    let (stream_id, mut events) = session.open_stream();
    debug!(stream_id, %subdomain, %method, %uri, "Forwarding request");

    if session
        .send(ControlMessage::HttpRequest {
            stream_id,
            subdomain,
            method,
            uri,
            headers,
        })
        .await
        .is_err()
    {
        session.pending().remove(stream_id);
        return bad_gateway("tunnel connection lost");
    }

    // Stream the request body toward the agent; an empty final chunk
    // marks end of request.
    let body_session = session.clone();
    let mut body_stream = req.into_body().into_data_stream();
    tokio::spawn(async move {
        loop {
            match body_stream.next().await {
                Some(Ok(chunk)) => {
                    if body_session
                        .send(ControlMessage::HttpRequestChunk {
                            stream_id,
                            data: chunk.to_vec(),
                            is_final: false,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Err(err)) => {
                    debug!(stream_id, error = %err, "Client body read failed");
                    let _ = body_session
                        .send(ControlMessage::StreamClose { stream_id })
                        .await;
                    return;
                }
                None => break,
            }
        }
        let _ = body_session
            .send(ControlMessage::HttpRequestChunk {
                stream_id,
                data: Vec::new(),
                is_final: true,
            })
            .await;
    });

    let (status, response_headers) =
        match tokio::time::timeout(state.response_timeout, events.recv()).await {
            Ok(Some(StreamEvent::Head { status, headers })) => (status, headers),
            Ok(Some(StreamEvent::Error { message })) => return bad_gateway(&message),
            Ok(Some(StreamEvent::Chunk { .. })) | Ok(None) => {
                return bad_gateway("tunnel connection lost")
            }
            Err(_) => {
                session.pending().remove(stream_id);
                let _ = session.try_send(ControlMessage::StreamClose { stream_id });
                return gateway_timeout();
            }
        };

    let guard = StreamGuard {
        session: session.clone(),
        stream_id,
        done: false,
    };
    let body = Body::from_stream(response_body(events, guard));

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in response_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(body)
        .unwrap_or_else(|_| bad_gateway("invalid upstream response"))
}

/// Cancels the stream toward the agent if the client goes away before the
/// response completes.
struct StreamGuard {
    session: Arc<AgentSession>,
    stream_id: u32,
    done: bool,
}

impl StreamGuard {
    fn complete(&mut self) {
        self.done = true;
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        debug!(stream_id = self.stream_id, "Client disconnected mid-response");
        self.session.pending().remove(self.stream_id);
        let _ = self.session.try_send(ControlMessage::StreamClose {
            stream_id: self.stream_id,
        });
    }
}

struct BodyState {
    events: mpsc::Receiver<StreamEvent>,
    guard: StreamGuard,
    done: bool,
}

fn response_body(
    events: mpsc::Receiver<StreamEvent>,
    guard: StreamGuard,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    futures_util::stream::unfold(
        BodyState {
            events,
            guard,
            done: false,
        },
        |mut st| async move {
            if st.done {
                return None;
            }
            match st.events.recv().await {
                Some(StreamEvent::Chunk { data, is_final }) => {
                    if is_final {
                        st.guard.complete();
                        st.done = true;
                        if data.is_empty() {
                            return None;
                        }
                    }
                    Some((Ok(data), st))
                }
                Some(StreamEvent::Error { message }) => {
                    st.guard.complete();
                    st.done = true;
                    Some((Err(std::io::Error::other(message)), st))
                }
                Some(StreamEvent::Head { .. }) => {
                    st.done = true;
                    Some((Err(std::io::Error::other("unexpected response head")), st))
                }
                None => {
                    // Session torn down mid-response: abort the transfer
                    st.guard.complete();
                    st.done = true;
                    Some((Err(std::io::Error::other("tunnel connection lost")), st))
                }
            }
        },
    )
}

fn not_found_response() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response()
}

fn offline_response(subdomain: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Html(OFFLINE_PAGE.replace("{subdomain}", subdomain)),
    )
        .into_response()
}

fn bad_gateway(message: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        format!("upstream tunnel error: {}", message),
    )
        .into_response()
}

fn gateway_timeout() -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        "upstream tunnel did not respond in time",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use sea_orm::{ConnectOptions, Database};
    use tower::ServiceExt;
    use uplink_control::BoundRoute;
    use uplink_db::{Migrator, MigratorTrait};
    use uplink_proto::AgentInfo;
    use uplink_registry::TunnelRegistry;
    use uuid::Uuid;

    const BASE: &str = "uplink.test";

    async fn test_manager() -> Arc<SessionManager> {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1);
        let db = Database::connect(opts).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(SessionManager::new(Arc::new(TunnelRegistry::new(db))))
    }

    fn test_router(manager: Arc<SessionManager>, response_timeout: Duration) -> Router {
        let mut config = ProxyConfig::new("127.0.0.1:0".parse().unwrap(), BASE);
        config.response_timeout = response_timeout;
        PublicServer::new(config, manager).router()
    }

    async fn bind_session(
        manager: &Arc<SessionManager>,
        subdomain: &str,
    ) -> (Arc<AgentSession>, mpsc::Receiver<ControlMessage>) {
        let (session, rx) = AgentSession::new(
            Uuid::new_v4(),
            "203.0.113.5:40000".parse().unwrap(),
            AgentInfo::default(),
            vec![BoundRoute {
                tunnel_id: Uuid::new_v4(),
                subdomain: subdomain.to_string(),
                local_port: 3000,
                public_url: format!("http://{}.{}", subdomain, BASE),
            }],
        );
        let session = Arc::new(session);
        manager.bind(session.clone()).await.unwrap();
        (session, rx)
    }

    fn request(host: &str, path: &str) -> Request {
        let mut req = Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("203.0.113.7:1234".parse().unwrap()));
        req
    }

    #[tokio::test]
    async fn test_unknown_host_is_404() {
        let manager = test_manager().await;
        let router = test_router(manager, Duration::from_secs(5));

        let resp = router
            .clone()
            .oneshot(request("example.com", "/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = router.oneshot(request(BASE, "/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_offline_subdomain_is_503_page() {
        let manager = test_manager().await;
        let router = test_router(manager, Duration::from_secs(5));

        let resp = router
            .oneshot(request(&format!("ghost.{}", BASE), "/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("Tunnel Offline"));
        assert!(body.contains("ghost"));
    }

    #[tokio::test]
    async fn test_roundtrip_through_live_session() {
        let manager = test_manager().await;
        let (session, mut agent_rx) = bind_session(&manager, "myapp").await;
        let router = test_router(manager, Duration::from_secs(5));

        // Fake agent: answer the first forwarded request
        let agent_session = session.clone();
        tokio::spawn(async move {
            while let Some(msg) = agent_rx.recv().await {
                if let ControlMessage::HttpRequest {
                    stream_id,
                    method,
                    uri,
                    headers,
                    ..
                } = msg
                {
                    assert_eq!(method, "GET");
                    assert_eq!(uri, "/hello?x=1");
                    assert!(headers
                        .iter()
                        .any(|(n, v)| n == "x-forwarded-for" && v == "203.0.113.7"));
                    agent_session
                        .pending()
                        .dispatch(
                            stream_id,
                            StreamEvent::Head {
                                status: 200,
                                headers: vec![(
                                    "content-type".to_string(),
                                    "text/plain".to_string(),
                                )],
                            },
                        )
                        .await;
                    agent_session
                        .pending()
                        .dispatch(
                            stream_id,
                            StreamEvent::Chunk {
                                data: Bytes::from_static(b"hello from agent"),
                                is_final: true,
                            },
                        )
                        .await;
                }
            }
        });

        let resp = router
            .oneshot(request(&format!("myapp.{}", BASE), "/hello?x=1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello from agent");
    }

    #[tokio::test]
    async fn test_stream_error_is_502() {
        let manager = test_manager().await;
        let (session, mut agent_rx) = bind_session(&manager, "myapp").await;
        let router = test_router(manager, Duration::from_secs(5));

        let agent_session = session.clone();
        tokio::spawn(async move {
            while let Some(msg) = agent_rx.recv().await {
                if let ControlMessage::HttpRequest { stream_id, .. } = msg {
                    agent_session
                        .pending()
                        .dispatch(
                            stream_id,
                            StreamEvent::Error {
                                message: "connection refused".to_string(),
                            },
                        )
                        .await;
                }
            }
        });

        let resp = router
            .oneshot(request(&format!("myapp.{}", BASE), "/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_silent_agent_is_504() {
        let manager = test_manager().await;
        let (_session, _agent_rx) = bind_session(&manager, "myapp").await;
        let router = test_router(manager, Duration::from_millis(100));

        let resp = router
            .oneshot(request(&format!("myapp.{}", BASE), "/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_teardown_mid_wait_is_terminal() {
        let manager = test_manager().await;
        let (session, mut agent_rx) = bind_session(&manager, "myapp").await;
        let router = test_router(manager.clone(), Duration::from_secs(5));

        // Kill the session as soon as the request reaches it
        let kill_manager = manager.clone();
        let kill_session = session.clone();
        tokio::spawn(async move {
            while let Some(msg) = agent_rx.recv().await {
                if matches!(msg, ControlMessage::HttpRequest { .. }) {
                    kill_manager.teardown(&kill_session, "test disconnect").await;
                }
            }
        });

        let resp = router
            .oneshot(request(&format!("myapp.{}", BASE), "/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
