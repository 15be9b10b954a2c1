//! Authentication for the uplink relay
//!
//! Covers the three bearer-token shapes the service issues (short-lived
//! session tokens, rotating refresh tokens, long-lived agent tokens),
//! Argon2id password hashing, the agent-auth callback allow-list, and
//! opaque secret generation.

pub mod callback;
pub mod jwt;
pub mod password;
pub mod tokens;

pub use callback::{callback_with_token, validate_callback, CallbackError};
pub use jwt::{Claims, JwtError, JwtKeys, TokenKind};
pub use password::{hash_password, verify_password, PasswordError};
pub use tokens::{generate_secret, hash_token};
