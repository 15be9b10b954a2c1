//! Tunnel registry
//!
//! Persistent registry of tunnel definitions (subdomain, local port,
//! per-tunnel auth token) layered over `uplink-db`. All writes from the
//! REST API and the control-plane handshake go through this crate;
//! subdomain uniqueness is enforced by the database unique index rather
//! than a check-then-insert race.

mod error;
mod evictor;
mod registry;

pub use error::RegistryError;
pub use evictor::{NoopEvictor, SessionEvictor};
pub use registry::TunnelRegistry;
