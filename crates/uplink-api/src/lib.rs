//! Management REST API
//!
//! Account signup/login with rotating refresh tokens, tunnel CRUD, the
//! agent-auth handshake, and a health endpoint, documented via OpenAPI
//! and served with Swagger UI.

pub mod handlers;
pub mod middleware;
pub mod models;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sea_orm::DatabaseConnection;
use uplink_auth::JwtKeys;
use uplink_control::SessionManager;
use uplink_registry::TunnelRegistry;

/// Application state shared across handlers
pub struct AppState {
    pub db: DatabaseConnection,
    pub registry: Arc<TunnelRegistry>,
    pub jwt: Arc<JwtKeys>,
    /// Live control-plane sessions; absent in API-only deployments.
    pub sessions: Option<Arc<SessionManager>>,
    /// Domain tunnels are published under, e.g. `uplink.test`.
    pub base_domain: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Uplink API",
        version = "0.1.0",
        description = "REST API for managing uplink tunnels and accounts"
    ),
    paths(
        handlers::signup,
        handlers::login,
        handlers::refresh,
        handlers::profile,
        handlers::list_tunnels,
        handlers::create_tunnel,
        handlers::delete_tunnel,
        handlers::agent_token,
        handlers::agent_auth,
        handlers::health_check,
    ),
    components(
        schemas(
            models::ErrorResponse,
            models::UserInfo,
            models::SignupRequest,
            models::LoginRequest,
            models::AuthResponse,
            models::RefreshRequest,
            models::RefreshResponse,
            models::TunnelInfo,
            models::TunnelList,
            models::CreateTunnelRequest,
            models::MessageResponse,
            models::AgentTokenRequest,
            models::AgentTokenResponse,
            models::AgentAuthRequest,
            models::AgentAuthResponse,
            models::HealthResponse,
        )
    ),
    tags(
        (name = "auth", description = "Authentication and account endpoints"),
        (name = "tunnels", description = "Tunnel management endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS (for development)
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            enable_cors: true,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let jwt_state = middleware::JwtState::new(self.state.jwt.clone());

        // PUBLIC routes (no authentication required)
        let public_router = Router::new()
            .route("/api/v1/health", get(handlers::health_check))
            .route("/api/v1/auth/signup", post(handlers::signup))
            .route("/api/v1/auth/login", post(handlers::login))
            .route("/api/v1/auth/refresh", post(handlers::refresh))
            .route("/api/v1/auth/agent-auth", post(handlers::agent_auth))
            .with_state(self.state.clone());

        // PROTECTED routes (require a session token)
        let protected_router = Router::new()
            .route("/api/v1/profile", get(handlers::profile))
            .route(
                "/api/v1/tunnels",
                get(handlers::list_tunnels).post(handlers::create_tunnel),
            )
            .route("/api/v1/tunnels/{id}", delete(handlers::delete_tunnel))
            .route("/api/v1/auth/agent-token", post(handlers::agent_token))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                jwt_state,
                middleware::require_auth,
            ));

        let api_router = public_router.merge(protected_router);

        // SwaggerUi serves /api/v1/openapi.json itself
        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", api_doc))
            .merge(api_router);

        let cors = if self.config.enable_cors {
            use tower_http::cors::AllowOrigin;

            // Credentials require exact origins, so allow only local
            // development hosts rather than Any.
            Some(
                CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST, Method::DELETE])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
                    .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
                        let origin_str = origin.to_str().unwrap_or("");
                        origin_str.starts_with("http://localhost:")
                            || origin_str.starts_with("http://127.0.0.1:")
                            || origin_str.starts_with("https://localhost:")
                            || origin_str.starts_with("https://127.0.0.1:")
                    })),
            )
        } else {
            None
        };

        let mut router = router.layer(TraceLayer::new_for_http());
        if let Some(cors) = cors {
            router = router.layer(cors);
        }

        router
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting API server on {}", self.config.bind_addr);
        info!("Swagger UI: http://{}/swagger-ui", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
