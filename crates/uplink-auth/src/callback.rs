//! Agent-auth callback validation
//!
//! The agent-authentication handshake hands a bearer token back to the
//! locally-running agent by appending it to a callback URL the browser
//! redirects to. The callback scheme must be allow-listed: anything else
//! would let an attacker-controlled URL receive the token (open-redirect
//! token exfiltration). This check is a hard requirement, not optional.

use thiserror::Error;
use url::Url;

/// Custom URI scheme registered by the agent for browser handoff.
pub const AGENT_SCHEME: &str = "uplink";

/// Callback validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Malformed callback URL: {0}")]
    MalformedCallback(String),

    #[error("Callback scheme '{0}' is not allowed")]
    SchemeNotAllowed(String),

    #[error("Callback host '{0}' is not a loopback address")]
    HostNotLoopback(String),
}

/// Validate a callback URL for the agent-auth handshake.
///
/// Allowed forms:
/// - `uplink://...` (custom scheme handled by the agent)
/// - `http://127.0.0.1[:port]/...` and `http://localhost[:port]/...`
///   (loopback HTTP server the agent listens on during login)
pub fn validate_callback(callback: &str) -> Result<(), CallbackError> {
    let url = Url::parse(callback)
        .map_err(|e| CallbackError::MalformedCallback(e.to_string()))?;

    match url.scheme() {
        AGENT_SCHEME => Ok(()),
        "http" => {
            let host = url
                .host_str()
                .ok_or_else(|| CallbackError::MalformedCallback("missing host".to_string()))?;

            if host == "127.0.0.1" || host == "localhost" || host == "[::1]" || host == "::1" {
                Ok(())
            } else {
                Err(CallbackError::HostNotLoopback(host.to_string()))
            }
        }
        other => Err(CallbackError::SchemeNotAllowed(other.to_string())),
    }
}

/// Append the issued token to a validated callback URL.
pub fn callback_with_token(callback: &str, token: &str) -> Result<String, CallbackError> {
    validate_callback(callback)?;

    let mut url = Url::parse(callback)
        .map_err(|e| CallbackError::MalformedCallback(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", token);

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_scheme_allowed() {
        assert!(validate_callback("uplink://auth/done").is_ok());
    }

    #[test]
    fn test_loopback_http_allowed() {
        assert!(validate_callback("http://127.0.0.1:8791/callback").is_ok());
        assert!(validate_callback("http://localhost:8791/callback").is_ok());
    }

    #[test]
    fn test_public_host_rejected() {
        assert_eq!(
            validate_callback("http://evil.example.com/steal"),
            Err(CallbackError::HostNotLoopback("evil.example.com".to_string()))
        );
    }

    #[test]
    fn test_https_to_public_host_rejected() {
        assert_eq!(
            validate_callback("https://evil.example.com/steal"),
            Err(CallbackError::SchemeNotAllowed("https".to_string()))
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_callback("not a url at all"),
            Err(CallbackError::MalformedCallback(_))
        ));
    }

    #[test]
    fn test_token_appended_as_query() {
        let url = callback_with_token("http://127.0.0.1:8791/callback", "tok123").unwrap();
        assert_eq!(url, "http://127.0.0.1:8791/callback?token=tok123");
    }

    #[test]
    fn test_callback_helpers_exported_at_crate_root() {
        assert!(crate::validate_callback("uplink://auth/done").is_ok());
        let url = crate::callback_with_token("uplink://auth/done", "tok").unwrap();
        assert!(url.contains("token=tok"));
    }

    #[test]
    fn test_token_not_appended_to_disallowed_callback() {
        assert!(callback_with_token("http://evil.example.com/", "tok123").is_err());
    }
}
