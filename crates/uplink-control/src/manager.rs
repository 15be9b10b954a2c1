//! Session manager and route table

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use uplink_proto::{BindError, ControlMessage};
use uplink_registry::{SessionEvictor, TunnelRegistry};

use crate::session::AgentSession;

/// Owns all live agent sessions and the subdomain route table the
/// reverse proxy resolves against.
pub struct SessionManager {
    registry: Arc<TunnelRegistry>,
    /// subdomain -> session serving it. Entries are inserted and removed
    /// as whole values, only by this type.
    routes: DashMap<String, Arc<AgentSession>>,
    sessions: DashMap<Uuid, Arc<AgentSession>>,
    /// Serializes route publication so a multi-subdomain bind is
    /// all-or-nothing against concurrent binds.
    publish_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        Self {
            registry,
            routes: DashMap::new(),
            sessions: DashMap::new(),
            publish_lock: Mutex::new(()),
        }
    }

    /// Publish a session's routes, enforcing at most one live session per
    /// subdomain. On conflict nothing is published and the session that
    /// already holds the subdomain is untouched.
    pub async fn bind(&self, session: Arc<AgentSession>) -> Result<(), BindError> {
        {
            let _guard = self.publish_lock.lock().unwrap();
            for route in session.routes() {
                if let Some(existing) = self.routes.get(&route.subdomain) {
                    if !existing.is_closed() {
                        return Err(BindError::TunnelAlreadyLive {
                            subdomain: route.subdomain.clone(),
                        });
                    }
                }
            }
            for route in session.routes() {
                self.routes.insert(route.subdomain.clone(), session.clone());
            }
            self.sessions.insert(session.id, session.clone());
        }

        let peer_ip = session.peer_addr.ip().to_string();
        for route in session.routes() {
            if let Err(err) = self
                .registry
                .mark_live(route.tunnel_id, &peer_ip, Utc::now())
                .await
            {
                warn!(subdomain = %route.subdomain, error = %err, "Failed to record tunnel liveness");
            }
        }

        info!(
            session_id = %session.id,
            peer = %session.peer_addr,
            tunnels = session.routes().len(),
            "Agent session live"
        );
        Ok(())
    }

    /// Resolve the live session serving a subdomain. Proxy hot path:
    /// never suspends.
    pub fn resolve(&self, subdomain: &str) -> Option<Arc<AgentSession>> {
        self.routes
            .get(subdomain)
            .map(|entry| entry.clone())
            .filter(|session| !session.is_closed())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn sessions_snapshot(&self) -> Vec<Arc<AgentSession>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Tear a session down. Idempotent: every way a connection can end
    /// funnels here, and only the first caller does the work.
    pub async fn teardown(&self, session: &Arc<AgentSession>, reason: &str) {
        if !session.begin_close() {
            return;
        }

        for route in session.routes() {
            // Another session may have re-bound the subdomain already;
            // only remove entries still pointing at this session.
            self.routes
                .remove_if(&route.subdomain, |_, s| Arc::ptr_eq(s, session));
        }
        self.sessions.remove(&session.id);

        session.pending().fail_all(reason);
        session.cancel_token().cancel();

        for route in session.routes() {
            if let Err(err) = self.registry.mark_offline(route.tunnel_id).await {
                warn!(subdomain = %route.subdomain, error = %err, "Failed to record tunnel offline");
            }
        }

        info!(session_id = %session.id, reason, "Agent session closed");
    }
}

#[async_trait]
impl SessionEvictor for SessionManager {
    async fn evict(&self, subdomain: &str) {
        let Some(session) = self.resolve(subdomain) else {
            return;
        };
        let _ = session
            .send(ControlMessage::Goodbye {
                reason: Some("tunnel deleted".to_string()),
            })
            .await;
        self.teardown(&session, "tunnel deleted").await;
    }
}
