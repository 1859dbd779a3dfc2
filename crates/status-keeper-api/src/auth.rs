//! HTTP Basic authentication for operator-facing query endpoints.
//!
//! The review system's webhooks authenticate with per-route HMAC signatures;
//! everything a human operator calls authenticates with a fixed username and
//! the `WEBHOOK_PASSWORD` credential instead.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use status_keeper_core::AuthError;
use subtle::ConstantTimeEq;

/// The fixed operator credentials.
#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// Authenticate a request and return the authenticated username.
///
/// Both credential comparisons are constant time; a wrong username and a
/// wrong password are indistinguishable to the caller.
pub fn authenticate(config: &BasicAuthConfig, headers: &HeaderMap) -> Result<String, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let encoded = header
        .strip_prefix("Basic ")
        .ok_or(AuthError::MissingCredentials)?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| AuthError::MissingCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MissingCredentials)?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::MissingCredentials)?;

    let username_ok: bool = username
        .as_bytes()
        .ct_eq(config.username.as_bytes())
        .into();
    let password_ok: bool = password
        .as_bytes()
        .ct_eq(config.password.as_bytes())
        .into();
    if username_ok && password_ok {
        Ok(username.to_string())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;
