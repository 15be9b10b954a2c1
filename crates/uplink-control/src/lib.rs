//! Agent session management
//!
//! The control plane for connected agents: a WebSocket listener that runs
//! the authenticate+bind handshake, per-session state (outbound queue,
//! heartbeat stamp, in-flight proxied streams), a shared subdomain route
//! table for the reverse proxy, and a sweeper that closes sessions whose
//! heartbeats stop.

mod error;
mod manager;
mod pending;
mod server;
mod session;
mod sweeper;

pub use error::ConnectionError;
pub use manager::SessionManager;
pub use pending::{PendingStreams, StreamEvent};
pub use server::{ControlServer, ControlServerConfig};
pub use session::{AgentSession, BoundRoute, SessionSendError};
pub use sweeper::{spawn_sweeper, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
