//! Wire protocol shared by the relay and the agent.
//!
//! An agent maintains one persistent control connection to the relay. The
//! connection carries an authenticate+bind handshake, periodic heartbeats,
//! and multiplexed request/response frames for proxied HTTP traffic. All
//! messages are bincode-encoded [`ControlMessage`] values.

pub mod codec;
pub mod messages;
pub mod stream;

pub use codec::{CodecError, ControlCodec};
pub use messages::{AgentInfo, BindError, BoundTunnel, ControlMessage};
pub use stream::{StreamId, StreamIds};

/// Protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum encoded message size (16MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
