//! Tunnel registry service

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use tracing::{debug, info};
use uuid::Uuid;

use uplink_db::entities::{prelude::Tunnel, tunnel};

use crate::{NoopEvictor, RegistryError, SessionEvictor};

static NOOP: NoopEvictor = NoopEvictor;

/// Registry of tunnel definitions, scoped per owning user.
pub struct TunnelRegistry {
    db: DatabaseConnection,
    evictor: OnceLock<Arc<dyn SessionEvictor>>,
}

impl TunnelRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            evictor: OnceLock::new(),
        }
    }

    /// Install the live-session evictor. Called once at startup, after the
    /// session manager exists; later calls are ignored.
    pub fn set_evictor(&self, evictor: Arc<dyn SessionEvictor>) {
        if self.evictor.set(evictor).is_err() {
            debug!("Session evictor already installed");
        }
    }

    fn evictor(&self) -> &dyn SessionEvictor {
        match self.evictor.get() {
            Some(e) => e.as_ref(),
            None => &NOOP,
        }
    }

    /// Create a tunnel for `user_id`.
    ///
    /// The subdomain is validated and lowercased first; uniqueness is left
    /// to the database unique index, so two concurrent creates for one
    /// subdomain resolve to exactly one success and one `SubdomainTaken`.
    pub async fn create_tunnel(
        &self,
        user_id: Uuid,
        name: &str,
        subdomain: &str,
        local_port: u16,
    ) -> Result<tunnel::Model, RegistryError> {
        let subdomain = uplink_validate::validate(subdomain)?;
        if local_port == 0 {
            return Err(RegistryError::InvalidPort);
        }

        let now = Utc::now();
        let model = tunnel::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set(name.to_string()),
            subdomain: Set(subdomain.as_str().to_string()),
            local_port: Set(i32::from(local_port)),
            auth_token: Set(uplink_auth::generate_secret()),
            is_active: Set(false),
            last_seen: Set(None),
            connected_ip: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&self.db).await.map_err(|err| {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                RegistryError::SubdomainTaken
            } else {
                RegistryError::Database(err)
            }
        })?;

        info!(subdomain = %created.subdomain, tunnel_id = %created.id, "Tunnel created");
        Ok(created)
    }

    /// List the user's tunnels, newest first.
    pub async fn list_tunnels(&self, user_id: Uuid) -> Result<Vec<tunnel::Model>, RegistryError> {
        let tunnels = Tunnel::find()
            .filter(tunnel::Column::UserId.eq(user_id))
            .order_by_desc(tunnel::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(tunnels)
    }

    /// Look up one of the user's tunnels by subdomain.
    ///
    /// Scoped to the owner so the control-plane handshake cannot bind a
    /// tunnel through another user's agent token.
    pub async fn get_tunnel_by_subdomain(
        &self,
        user_id: Uuid,
        subdomain: &str,
    ) -> Result<tunnel::Model, RegistryError> {
        Tunnel::find()
            .filter(tunnel::Column::UserId.eq(user_id))
            .filter(tunnel::Column::Subdomain.eq(subdomain))
            .one(&self.db)
            .await?
            .ok_or(RegistryError::NotFound)
    }

    /// Delete a tunnel, tearing down any live session bound to it first.
    pub async fn delete_tunnel(
        &self,
        user_id: Uuid,
        tunnel_id: Uuid,
    ) -> Result<(), RegistryError> {
        let existing = Tunnel::find_by_id(tunnel_id)
            .one(&self.db)
            .await?
            .ok_or(RegistryError::NotFound)?;
        if existing.user_id != user_id {
            return Err(RegistryError::Unauthorized);
        }

        // Evict before the row goes away so no session keeps serving a
        // subdomain that is free for re-registration.
        self.evictor().evict(&existing.subdomain).await;

        Tunnel::delete_by_id(tunnel_id).exec(&self.db).await?;
        info!(subdomain = %existing.subdomain, tunnel_id = %tunnel_id, "Tunnel deleted");
        Ok(())
    }

    /// Record that an agent session now serves this tunnel.
    pub async fn mark_live(
        &self,
        tunnel_id: Uuid,
        connected_ip: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        Tunnel::update_many()
            .col_expr(tunnel::Column::IsActive, Expr::value(true))
            .col_expr(tunnel::Column::LastSeen, Expr::value(Some(at)))
            .col_expr(
                tunnel::Column::ConnectedIp,
                Expr::value(Some(connected_ip.to_string())),
            )
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(tunnel_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Record that no agent session serves this tunnel any more.
    ///
    /// Idempotent; a no-op when the tunnel row is already gone.
    pub async fn mark_offline(&self, tunnel_id: Uuid) -> Result<(), RegistryError> {
        Tunnel::update_many()
            .col_expr(tunnel::Column::IsActive, Expr::value(false))
            .col_expr(
                tunnel::Column::ConnectedIp,
                Expr::value(Option::<String>::None),
            )
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(tunnel_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
