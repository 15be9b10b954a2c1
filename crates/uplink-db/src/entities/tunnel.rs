//! Tunnel entity: a named binding of a public subdomain to a local port
//!
//! Liveness fields (`is_active`, `last_seen`, `connected_ip`) are written
//! only by the session manager; everything else is immutable after
//! creation except via delete.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnels")]
pub struct Model {
    /// Tunnel UUID (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Human-readable tunnel name (not unique)
    pub name: String,

    /// Public subdomain; the unique index here is the concurrency guard
    /// for creation
    #[sea_orm(unique)]
    pub subdomain: String,

    /// Local port the agent forwards to (1-65535)
    pub local_port: i32,

    /// Per-tunnel secret, shown to the owner only
    pub auth_token: String,

    /// Whether a live agent session currently serves this tunnel
    pub is_active: bool,

    /// Last heartbeat or connect time observed by the session manager
    pub last_seen: Option<ChronoDateTimeUtc>,

    /// Peer address of the agent currently (or last) serving this tunnel
    pub connected_ip: Option<String>,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
