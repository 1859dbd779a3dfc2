//! Tests for HTTP Basic authentication.

use super::*;
use axum::http::HeaderValue;

fn config() -> BasicAuthConfig {
    BasicAuthConfig {
        username: "status-keeper".to_string(),
        password: "hunter2".to_string(),
    }
}

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    headers
}

fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
}

#[test]
fn test_valid_credentials_return_username() {
    let username = authenticate(&config(), &headers_with(&basic("status-keeper", "hunter2")))
        .unwrap();
    assert_eq!(username, "status-keeper");
}

#[test]
fn test_wrong_password_rejected() {
    let err = authenticate(&config(), &headers_with(&basic("status-keeper", "wrong")))
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}

#[test]
fn test_wrong_username_rejected() {
    let err =
        authenticate(&config(), &headers_with(&basic("operator", "hunter2"))).unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}

#[test]
fn test_missing_header_rejected() {
    let err = authenticate(&config(), &HeaderMap::new()).unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
}

#[test]
fn test_non_basic_scheme_rejected() {
    let err = authenticate(&config(), &headers_with("Bearer token")).unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
}

#[test]
fn test_malformed_base64_rejected() {
    let err = authenticate(&config(), &headers_with("Basic !!!")).unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
}

#[test]
fn test_missing_colon_rejected() {
    let encoded = BASE64.encode("no-colon-here");
    let err = authenticate(&config(), &headers_with(&format!("Basic {encoded}")))
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
}
