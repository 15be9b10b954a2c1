//! Protocol message types

use serde::{Deserialize, Serialize};

/// Messages exchanged over an agent control connection.
///
/// The handshake (`Hello`/`HelloAck`/`HelloReject`) happens once per
/// connection; everything after it is heartbeats and per-stream traffic.
/// Stream IDs are allocated by the relay and never reused while in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlMessage {
    // Handshake
    Hello {
        protocol_version: u16,
        agent_token: String,
        /// Subdomains of the tunnels this agent will serve.
        subdomains: Vec<String>,
        agent: AgentInfo,
    },
    HelloAck {
        session_id: String,
        tunnels: Vec<BoundTunnel>,
    },
    HelloReject {
        error: BindError,
    },

    // Liveness
    Ping {
        seq: u64,
        timestamp: u64,
    },
    Pong {
        seq: u64,
        timestamp: u64,
    },
    Goodbye {
        reason: Option<String>,
    },

    // Proxied HTTP traffic (relay -> agent)
    HttpRequest {
        stream_id: u32,
        subdomain: String,
        method: String,
        uri: String,
        headers: Vec<(String, String)>,
    },
    HttpRequestChunk {
        stream_id: u32,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        is_final: bool,
    },

    // Proxied HTTP traffic (agent -> relay)
    HttpResponse {
        stream_id: u32,
        status: u16,
        headers: Vec<(String, String)>,
    },
    HttpResponseChunk {
        stream_id: u32,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        is_final: bool,
    },

    /// Per-stream failure (local connect refused, local read error, ...).
    /// Terminates the stream in both directions.
    StreamError {
        stream_id: u32,
        message: String,
    },
    /// Graceful per-stream termination; sent by either side when it is
    /// done with the stream (client disconnect, response complete, ...).
    StreamClose {
        stream_id: u32,
    },
}

/// Why a `Hello` was rejected. The whole handshake is all-or-nothing: one
/// bad subdomain rejects the connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BindError {
    InvalidToken,
    UnsupportedProtocolVersion { server: u16, agent: u16 },
    TunnelNotFound { subdomain: String },
    TunnelAlreadyLive { subdomain: String },
    NoTunnelsRequested,
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::InvalidToken => write!(f, "invalid agent token"),
            BindError::UnsupportedProtocolVersion { server, agent } => write!(
                f,
                "unsupported protocol version (server {}, agent {})",
                server, agent
            ),
            BindError::TunnelNotFound { subdomain } => {
                write!(f, "tunnel not found: {}", subdomain)
            }
            BindError::TunnelAlreadyLive { subdomain } => {
                write!(f, "tunnel already served by a live session: {}", subdomain)
            }
            BindError::NoTunnelsRequested => write!(f, "handshake named no tunnels"),
        }
    }
}

/// A tunnel bound to a session, as confirmed in `HelloAck`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundTunnel {
    pub subdomain: String,
    pub local_port: u16,
    pub public_url: String,
}

/// Agent self-description sent in the handshake, for diagnostics only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    pub hostname: String,
    pub platform: String,
    pub version: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            hostname: "unknown".to_string(),
            platform: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<u8>::deserialize(deserializer)
    }
}
