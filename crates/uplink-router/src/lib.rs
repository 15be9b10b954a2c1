//! Public reverse proxy
//!
//! The internet-facing HTTP server. Every request is matched to a tunnel
//! by the subdomain in its Host header and forwarded over the owning
//! agent's control connection; responses stream back without buffering.

mod host;
mod proxy;

pub use host::{classify_host, HostMatch};
pub use proxy::{PublicServer, ProxyConfig};
