use thiserror::Error;
use uplink_proto::{BindError, CodecError};

/// Why an agent control connection ended during or after the handshake.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("agent did not complete the handshake in time")]
    HandshakeTimeout,

    #[error("connection closed before the handshake completed")]
    ClosedDuringHandshake,

    #[error("unexpected message for connection state")]
    UnexpectedMessage,

    #[error("bind rejected: {0}")]
    Rejected(BindError),

    #[error("registry error: {0}")]
    Registry(#[from] uplink_registry::RegistryError),
}
