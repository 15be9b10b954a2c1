//! Session authentication middleware
//!
//! Validates the `Authorization: Bearer <token>` header against the
//! relay's JWT keys and injects the authenticated user into request
//! extensions. Only session tokens pass; refresh and agent tokens are
//! rejected even though they share the signing key.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use uplink_auth::{JwtKeys, TokenKind};

use crate::models::ErrorResponse;

/// Authenticated user context for protected handlers
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// JWT state shared across middleware instances
#[derive(Clone)]
pub struct JwtState {
    pub keys: Arc<JwtKeys>,
}

impl JwtState {
    pub fn new(keys: Arc<JwtKeys>) -> Self {
        Self { keys }
    }
}

/// Require a valid session token.
///
/// Returns 401 when the header is missing or malformed, when the token
/// fails validation or is expired, and when the token is not a session
/// token.
pub async fn require_auth(
    state: axum::extract::State<JwtState>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "Missing Authorization header",
                    "MISSING_AUTH",
                )),
            )
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "Invalid Authorization header format. Expected 'Bearer <token>'",
                "INVALID_AUTH_FORMAT",
            )),
        )
    })?;

    let claims = state.keys.validate(token, TokenKind::Session).map_err(|e| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                format!("Invalid or expired token: {}", e),
                "INVALID_TOKEN",
            )),
        )
    })?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "Token subject is not a user id",
                "INVALID_TOKEN",
            )),
        )
    })?;

    request.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn protected_handler(
        axum::Extension(user): axum::Extension<AuthUser>,
    ) -> String {
        user.user_id.to_string()
    }

    fn create_test_app(keys: Arc<JwtKeys>) -> Router {
        let jwt_state = JwtState::new(keys);
        Router::new()
            .route("/protected", get(protected_handler))
            .layer(middleware::from_fn_with_state(jwt_state, require_auth))
    }

    #[tokio::test]
    async fn test_valid_session_token_passes() {
        let keys = Arc::new(JwtKeys::new(b"test-secret-key"));
        let app = create_test_app(keys.clone());

        let user_id = Uuid::new_v4();
        let token = keys.issue_session(&user_id.to_string()).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&body), user_id.to_string());
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let keys = Arc::new(JwtKeys::new(b"test-secret-key"));
        let app = create_test_app(keys);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code.as_deref(), Some("MISSING_AUTH"));
    }

    #[tokio::test]
    async fn test_non_bearer_header_is_401() {
        let keys = Arc::new(JwtKeys::new(b"test-secret-key"));
        let app = create_test_app(keys);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_401() {
        let keys = Arc::new(JwtKeys::new(b"test-secret-key"));
        let other = JwtKeys::new(b"other-secret");
        let app = create_test_app(keys);

        let token = other.issue_session(&Uuid::new_v4().to_string()).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_for_api_access() {
        let keys = Arc::new(JwtKeys::new(b"test-secret-key"));
        let app = create_test_app(keys.clone());

        let token = keys
            .issue_refresh(&Uuid::new_v4().to_string(), "jti-1")
            .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_agent_token_rejected_for_api_access() {
        let keys = Arc::new(JwtKeys::new(b"test-secret-key"));
        let app = create_test_app(keys.clone());

        let token = keys.issue_agent(&Uuid::new_v4().to_string()).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
