//! Inbound webhook verification and parsing.
//!
//! The review system signs each webhook body with HMAC-SHA256 and sends the
//! hex digest in `X-Phabricator-Webhook-Signature`. Each route has its own
//! secret, selected by the route the request arrived on, never by payload
//! content. The body is only parsed after the signature has been verified;
//! unauthenticated input is never fed to the JSON parser.

use crate::{AuthError, ValidationError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Header carrying the hex HMAC-SHA256 digest of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-phabricator-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Routes and secrets
// ============================================================================

/// The two signed webhook routes, each bound to its own secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRoute {
    /// Backport-check events: revision summaries to scan for upstream PRs.
    BackportCheck,
    /// Trigger-CI events: revision comment transactions to scan for build
    /// commands.
    TriggerCi,
}

impl WebhookRoute {
    /// The environment variable holding this route's HMAC secret.
    pub fn secret_env(self) -> &'static str {
        match self {
            Self::BackportCheck => "HMAC_BACKPORT_CHECK",
            Self::TriggerCi => "HMAC_TRIGGER_CI",
        }
    }
}

/// An HMAC secret, zeroized on drop and redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "webhook secret".to_string(),
            });
        }
        Ok(Self(value))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WebhookSecret").field(&"<REDACTED>").finish()
    }
}

/// The per-route secrets, loaded once at startup.
///
/// A route whose secret is unconfigured rejects every delivery; it never
/// falls back to the other route's secret or to unauthenticated processing.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub backport_check: Option<WebhookSecret>,
    pub trigger_ci: Option<WebhookSecret>,
}

impl WebhookSecrets {
    fn for_route(&self, route: WebhookRoute) -> Result<&WebhookSecret, AuthError> {
        let secret = match route {
            WebhookRoute::BackportCheck => self.backport_check.as_ref(),
            WebhookRoute::TriggerCi => self.trigger_ci.as_ref(),
        };
        secret.ok_or(AuthError::MissingSecret {
            var: route.secret_env(),
        })
    }
}

// ============================================================================
// Verification
// ============================================================================

/// Verify the hex HMAC-SHA256 signature of a raw webhook body.
///
/// The decoded digests are compared in constant time with respect to
/// secret-dependent data.
pub fn verify_signature(
    secret: &WebhookSecret,
    body: &[u8],
    signature_hex: &str,
) -> Result<(), AuthError> {
    let provided = hex::decode(signature_hex).map_err(|_| AuthError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::MalformedSignature)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    // Digest length is public; only the contents are secret-dependent.
    if provided.len() != expected.len() {
        return Err(AuthError::SignatureMismatch);
    }
    if expected.as_slice().ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(AuthError::SignatureMismatch)
    }
}

// ============================================================================
// Events
// ============================================================================

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub route: WebhookRoute,
    pub payload: serde_json::Value,
}

/// Errors produced while receiving a webhook delivery.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Verify and parse an inbound webhook delivery.
///
/// Verification strictly precedes parsing: a body that fails authentication
/// is rejected without ever being handed to the JSON parser.
pub fn receive(
    route: WebhookRoute,
    secrets: &WebhookSecrets,
    body: &[u8],
    signature: Option<&str>,
) -> Result<WebhookEvent, WebhookError> {
    let secret = secrets.for_route(route)?;
    let signature = signature.ok_or(AuthError::MissingSignature)?;
    verify_signature(secret, body, signature)?;

    let payload = serde_json::from_slice(body)?;
    Ok(WebhookEvent { route, payload })
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod webhook_tests;
