use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}

/// Public view of a user account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<uplink_db::entities::user::Model> for UserInfo {
    fn from(user: uplink_db::entities::user::Model) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

/// Signup request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Session + refresh token pair with the authenticated user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    /// Session JWT (bearer)
    pub token: String,
    /// Rotating refresh JWT
    pub refresh_token: String,
    pub user: UserInfo,
}

/// Refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// New token pair after rotation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub token: String,
    pub refresh_token: String,
}

/// Tunnel as returned to its owner
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TunnelInfo {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    /// Public URL this tunnel serves
    pub public_url: String,
    pub local_port: u16,
    /// Per-tunnel secret; only ever shown to the owner
    pub auth_token: String,
    /// Whether an agent session currently serves this tunnel
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tunnel list
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TunnelList {
    pub tunnels: Vec<TunnelInfo>,
    pub total: usize,
}

/// Create tunnel request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTunnelRequest {
    pub name: String,
    pub subdomain: String,
    pub local_port: u16,
}

/// Generic message response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Agent token request: where to hand the issued token back to
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentTokenRequest {
    /// Callback the local agent listens on; scheme must be allow-listed
    pub callback_url: String,
}

/// Issued agent token and the redirect that delivers it
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentTokenResponse {
    pub token: String,
    /// Callback URL with the token appended
    pub redirect_url: String,
}

/// Agent token verification request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentAuthRequest {
    pub token: String,
}

/// Agent token verification result
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentAuthResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Live agent sessions on this relay
    pub active_sessions: usize,
}
