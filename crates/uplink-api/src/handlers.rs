use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use uplink_auth::{
    callback_with_token, hash_password, hash_token, validate_callback, verify_password, TokenKind,
};
use uplink_db::entities::{
    prelude::{RefreshToken, User},
    refresh_token, user,
};
use uplink_registry::RegistryError;

use crate::middleware::AuthUser;
use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    warn!("Internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error", "INTERNAL")),
    )
}

fn invalid_credentials() -> ApiError {
    // One error for both unknown email and wrong password, so the login
    // endpoint cannot be used to probe which accounts exist.
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(
            "Invalid email or password",
            "INVALID_CREDENTIALS",
        )),
    )
}

fn public_url(base_domain: &str, subdomain: &str) -> String {
    format!("http://{}.{}", subdomain, base_domain)
}

fn tunnel_info(base_domain: &str, model: uplink_db::entities::tunnel::Model) -> TunnelInfo {
    TunnelInfo {
        id: model.id,
        name: model.name,
        public_url: public_url(base_domain, &model.subdomain),
        subdomain: model.subdomain,
        local_port: model.local_port as u16,
        auth_token: model.auth_token,
        is_active: model.is_active,
        last_seen: model.last_seen,
        connected_ip: model.connected_ip,
        created_at: model.created_at,
    }
}

/// Issue a session + refresh pair and persist the refresh rotation record.
async fn issue_token_pair(
    state: &AppState,
    user_id: Uuid,
) -> Result<(String, String), ApiError> {
    let jti = Uuid::new_v4();
    let session = state
        .jwt
        .issue_session(&user_id.to_string())
        .map_err(internal_error)?;
    let refresh = state
        .jwt
        .issue_refresh(&user_id.to_string(), &jti.to_string())
        .map_err(internal_error)?;

    let now = Utc::now();
    refresh_token::ActiveModel {
        id: Set(jti),
        user_id: Set(user_id),
        token_hash: Set(hash_token(&refresh)),
        expires_at: Set(now + state.jwt.refresh_validity()),
        revoked_at: Set(None),
        created_at: Set(now),
    }
    .insert(&state.db)
    .await
    .map_err(internal_error)?;

    Ok((session, refresh))
}

/// Create a new account
#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid email or password", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid email address", "INVALID_EMAIL")),
        ));
    }
    if req.password.len() < 8 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "Password must be at least 8 characters",
                "WEAK_PASSWORD",
            )),
        ));
    }

    let password_hash = hash_password(&req.password).map_err(internal_error)?;

    let now = Utc::now();
    let model = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        name: Set(req.name),
        password_hash: Set(password_hash),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    };

    // Uniqueness is the database's call; racing signups for one email
    // resolve to exactly one account.
    let created = match model.insert(&state.db).await {
        Ok(created) => created,
        Err(err) => {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                return Err((
                    StatusCode::CONFLICT,
                    Json(ErrorResponse::new(
                        "Email is already registered",
                        "EMAIL_TAKEN",
                    )),
                ));
            }
            return Err(internal_error(err));
        }
    };

    info!(user_id = %created.id, "Account created");

    let (token, refresh_token) = issue_token_pair(&state, created.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            refresh_token,
            user: created.into(),
        }),
    ))
}

/// Log in with email and password
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();

    let account = User::find()
        .filter(user::Column::Email.eq(&email))
        .one(&state.db)
        .await
        .map_err(internal_error)?
        .ok_or_else(invalid_credentials)?;

    if !account.is_active {
        return Err(invalid_credentials());
    }

    let ok = verify_password(&req.password, &account.password_hash).map_err(internal_error)?;
    if !ok {
        return Err(invalid_credentials());
    }

    debug!(user_id = %account.id, "Login succeeded");

    let (token, refresh_token) = issue_token_pair(&state, account.id).await?;
    Ok(Json(AuthResponse {
        token,
        refresh_token,
        user: account.into(),
    }))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = RefreshResponse),
        (status = 401, description = "Refresh token invalid, expired or revoked", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let rejected = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "Invalid or expired refresh token",
                "INVALID_REFRESH_TOKEN",
            )),
        )
    };

    let claims = state
        .jwt
        .validate(&req.refresh_token, TokenKind::Refresh)
        .map_err(|_| rejected())?;
    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| rejected())?;

    let record = RefreshToken::find()
        .filter(refresh_token::Column::TokenHash.eq(hash_token(&req.refresh_token)))
        .one(&state.db)
        .await
        .map_err(internal_error)?
        .ok_or_else(rejected)?;

    let now = Utc::now();
    if record.user_id != user_id || record.expires_at < now {
        return Err(rejected());
    }
    if record.revoked_at.is_some() {
        // Reuse of a rotated-out token; likely replay
        warn!(user_id = %user_id, "Revoked refresh token presented");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "Refresh token has been revoked",
                "REVOKED_TOKEN",
            )),
        ));
    }

    // Rotation: the old record is revoked and the replacement inserted in
    // one transaction, so a crash cannot leave both tokens live.
    let jti = Uuid::new_v4();
    let session = state
        .jwt
        .issue_session(&user_id.to_string())
        .map_err(internal_error)?;
    let new_refresh = state
        .jwt
        .issue_refresh(&user_id.to_string(), &jti.to_string())
        .map_err(internal_error)?;
    let new_hash = hash_token(&new_refresh);
    let refresh_validity = state.jwt.refresh_validity();

    let txn = state.db.begin().await.map_err(internal_error)?;
    let mut revoked: refresh_token::ActiveModel = record.into();
    revoked.revoked_at = Set(Some(now));
    revoked.update(&txn).await.map_err(internal_error)?;

    refresh_token::ActiveModel {
        id: Set(jti),
        user_id: Set(user_id),
        token_hash: Set(new_hash),
        expires_at: Set(now + refresh_validity),
        revoked_at: Set(None),
        created_at: Set(now),
    }
    .insert(&txn)
    .await
    .map_err(internal_error)?;
    txn.commit().await.map_err(internal_error)?;

    debug!(user_id = %user_id, "Refresh token rotated");

    Ok(Json(RefreshResponse {
        token: session,
        refresh_token: new_refresh,
    }))
}

/// Get the authenticated user's profile
#[utoipa::path(
    get,
    path = "/api/v1/profile",
    responses(
        (status = 200, description = "User profile", body = UserInfo),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserInfo>, ApiError> {
    let account = User::find_by_id(auth.user_id)
        .one(&state.db)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Account no longer exists", "NO_ACCOUNT")),
            )
        })?;

    Ok(Json(account.into()))
}

/// List the authenticated user's tunnels
#[utoipa::path(
    get,
    path = "/api/v1/tunnels",
    responses(
        (status = 200, description = "List of tunnels", body = TunnelList),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "tunnels"
)]
pub async fn list_tunnels(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<TunnelList>, ApiError> {
    debug!(user_id = %auth.user_id, "Listing tunnels");

    let tunnels: Vec<TunnelInfo> = state
        .registry
        .list_tunnels(auth.user_id)
        .await
        .map_err(internal_error)?
        .into_iter()
        .map(|m| tunnel_info(&state.base_domain, m))
        .collect();

    let total = tunnels.len();
    Ok(Json(TunnelList { tunnels, total }))
}

/// Register a new tunnel
#[utoipa::path(
    post,
    path = "/api/v1/tunnels",
    request_body = CreateTunnelRequest,
    responses(
        (status = 201, description = "Tunnel created", body = TunnelInfo),
        (status = 400, description = "Invalid subdomain or port", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 409, description = "Subdomain already taken", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "tunnels"
)]
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<(StatusCode, Json<TunnelInfo>), ApiError> {
    let created = state
        .registry
        .create_tunnel(auth.user_id, &req.name, &req.subdomain, req.local_port)
        .await
        .map_err(|err| match err {
            RegistryError::InvalidSubdomain(e) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(e.to_string(), "INVALID_SUBDOMAIN")),
            ),
            RegistryError::InvalidPort => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Local port must be non-zero", "INVALID_PORT")),
            ),
            RegistryError::SubdomainTaken => (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new(
                    format!("Subdomain '{}' is already taken", req.subdomain),
                    "SUBDOMAIN_TAKEN",
                )),
            ),
            other => internal_error(other),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(tunnel_info(&state.base_domain, created)),
    ))
}

/// Delete a tunnel
#[utoipa::path(
    delete,
    path = "/api/v1/tunnels/{id}",
    params(
        ("id" = Uuid, Path, description = "Tunnel ID")
    ),
    responses(
        (status = 200, description = "Tunnel deleted", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Tunnel belongs to another user", body = ErrorResponse),
        (status = 404, description = "Tunnel not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "tunnels"
)]
pub async fn delete_tunnel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .registry
        .delete_tunnel(auth.user_id, id)
        .await
        .map_err(|err| match err {
            RegistryError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(
                    format!("Tunnel '{}' not found", id),
                    "TUNNEL_NOT_FOUND",
                )),
            ),
            RegistryError::Unauthorized => (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new(
                    "Tunnel belongs to another user",
                    "FORBIDDEN",
                )),
            ),
            other => internal_error(other),
        })?;

    Ok(Json(MessageResponse {
        message: "Tunnel deleted".to_string(),
    }))
}

/// Issue a long-lived agent token for the authenticated user
#[utoipa::path(
    post,
    path = "/api/v1/auth/agent-token",
    request_body = AgentTokenRequest,
    responses(
        (status = 200, description = "Agent token issued", body = AgentTokenResponse),
        (status = 400, description = "Callback URL not allowed", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn agent_token(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<AgentTokenRequest>,
) -> Result<Json<AgentTokenResponse>, ApiError> {
    validate_callback(&req.callback_url).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string(), "CALLBACK_NOT_ALLOWED")),
        )
    })?;

    let token = state
        .jwt
        .issue_agent(&auth.user_id.to_string())
        .map_err(internal_error)?;
    let redirect_url = callback_with_token(&req.callback_url, &token).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string(), "CALLBACK_NOT_ALLOWED")),
        )
    })?;

    info!(user_id = %auth.user_id, "Agent token issued");

    Ok(Json(AgentTokenResponse {
        token,
        redirect_url,
    }))
}

/// Verify an agent token
#[utoipa::path(
    post,
    path = "/api/v1/auth/agent-auth",
    request_body = AgentAuthRequest,
    responses(
        (status = 200, description = "Verification result", body = AgentAuthResponse)
    ),
    tag = "auth"
)]
pub async fn agent_auth(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentAuthRequest>,
) -> Result<Json<AgentAuthResponse>, ApiError> {
    let claims = match state.jwt.validate(&req.token, TokenKind::Agent) {
        Ok(claims) => claims,
        Err(_) => {
            return Ok(Json(AgentAuthResponse {
                valid: false,
                user: None,
            }))
        }
    };

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => {
            return Ok(Json(AgentAuthResponse {
                valid: false,
                user: None,
            }))
        }
    };

    let account = User::find_by_id(user_id)
        .one(&state.db)
        .await
        .map_err(internal_error)?;

    match account {
        Some(account) if account.is_active => Ok(Json(AgentAuthResponse {
            valid: true,
            user: Some(account.into()),
        })),
        _ => Ok(Json(AgentAuthResponse {
            valid: false,
            user: None,
        })),
    }
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_sessions = state
        .sessions
        .as_ref()
        .map(|m| m.session_count())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions,
    })
}
