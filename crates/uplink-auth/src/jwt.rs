//! JWT (JSON Web Token) handling
//!
//! All tokens are HS256 and carry a `token_type` claim so a refresh token
//! can never be replayed as a session token, and an agent token can never
//! drive the web API.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token issuer claim
pub const ISSUER: &str = "uplink-relay";

/// What a token is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Browser/API session, lifetime in hours.
    Session,
    /// Exchanged for a new session+refresh pair; lifetime in days,
    /// server-side rotation state in the database.
    Refresh,
    /// Held by the companion agent. Effectively non-expiring by design:
    /// the product trades periodic re-auth for agent UX, like comparable
    /// tunnel services.
    Agent,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Session => "session",
            TokenKind::Refresh => "refresh",
            TokenKind::Agent => "agent",
        }
    }
}

/// JWT claims for user and agent tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject: user UUID
    pub sub: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// What this token is for
    pub token_type: TokenKind,
    /// Token UUID, used to key refresh-token rotation state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn new(user_id: String, kind: TokenKind, validity: Duration) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + validity).timestamp(),
            iss: ISSUER.to_string(),
            token_type: kind,
            jti: None,
        }
    }

    pub fn with_jti(mut self, jti: String) -> Self {
        self.jti = Some(jti);
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// JWT errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Wrong token type: expected {expected:?}, got {actual:?}")]
    WrongTokenType {
        expected: TokenKind,
        actual: TokenKind,
    },
}

/// Encoder/validator pair bound to one HMAC secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_validity: Duration,
    refresh_validity: Duration,
}

impl JwtKeys {
    /// Validity given to agent tokens. Far enough out to be non-expiring
    /// in practice while still producing a well-formed `exp` claim.
    pub const AGENT_VALIDITY_DAYS: i64 = 365 * 20;

    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_validity: Duration::hours(24),
            refresh_validity: Duration::days(7),
        }
    }

    pub fn with_session_validity(mut self, validity: Duration) -> Self {
        self.session_validity = validity;
        self
    }

    pub fn with_refresh_validity(mut self, validity: Duration) -> Self {
        self.refresh_validity = validity;
        self
    }

    /// How long issued refresh tokens live; the rotation record in the
    /// database carries the same expiry.
    pub fn refresh_validity(&self) -> Duration {
        self.refresh_validity
    }

    /// Issue a session token for a user.
    pub fn issue_session(&self, user_id: &str) -> Result<String, JwtError> {
        self.encode(&Claims::new(
            user_id.to_string(),
            TokenKind::Session,
            self.session_validity,
        ))
    }

    /// Issue a refresh token; `jti` keys the server-side rotation record.
    pub fn issue_refresh(&self, user_id: &str, jti: &str) -> Result<String, JwtError> {
        self.encode(
            &Claims::new(
                user_id.to_string(),
                TokenKind::Refresh,
                self.refresh_validity,
            )
            .with_jti(jti.to_string()),
        )
    }

    /// Issue a long-lived agent token.
    pub fn issue_agent(&self, user_id: &str) -> Result<String, JwtError> {
        self.encode(&Claims::new(
            user_id.to_string(),
            TokenKind::Agent,
            Duration::days(Self::AGENT_VALIDITY_DAYS),
        ))
    }

    fn encode(&self, claims: &Claims) -> Result<String, JwtError> {
        let header = Header::new(Algorithm::HS256);
        Ok(encode(&header, claims, &self.encoding)?)
    }

    /// Validate a token's signature and expiry and check its kind.
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_issuer(&[ISSUER]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                _ => JwtError::InvalidToken,
            }
        })?;

        if data.claims.token_type != expected {
            return Err(JwtError::WrongTokenType {
                expected,
                actual: data.claims.token_type,
            });
        }

        Ok(data.claims)
    }
}
