//! Live-session eviction seam
//!
//! Deleting a tunnel must tear down any live agent session bound to its
//! subdomain before the row disappears. The session manager lives in a
//! crate that depends on this one, so the registry calls through a trait
//! object installed at startup instead of depending on it directly.

use async_trait::async_trait;

#[async_trait]
pub trait SessionEvictor: Send + Sync {
    /// Force-close any live session currently bound to `subdomain`.
    ///
    /// Must be idempotent and must not fail: by the time this returns the
    /// subdomain no longer resolves to a session.
    async fn evict(&self, subdomain: &str);
}

/// Evictor for deployments (and tests) with no control plane running.
pub struct NoopEvictor;

#[async_trait]
impl SessionEvictor for NoopEvictor {
    async fn evict(&self, _subdomain: &str) {}
}
