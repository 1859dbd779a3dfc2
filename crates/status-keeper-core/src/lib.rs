//! # Status-Keeper Core
//!
//! Core business logic for the status-keeper CI aggregation service.
//!
//! This crate contains the domain logic for verifying inbound review-system
//! webhooks, normalizing build statuses from heterogeneous CI providers,
//! tracking builds per review target, and notifying downstream systems when a
//! target's aggregate status changes.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`clients`])
//! - Infrastructure implementations are injected at startup
//! - The [`registry`] is the only mutable shared state and is guarded by a
//!   per-target lock held across the whole read-mutate-aggregate-notify
//!   sequence

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier of a review target (the diff/revision build-target handle that
/// the review system keys CI results on).
///
/// Opaque to this service; only equality and hashing matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    /// Create a new target ID with validation.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "target_id".to_string(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "target_id".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TargetId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of one CI build run, unique within a target.
///
/// Providers report numeric or string ids; both are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(String);

impl BuildId {
    /// Create a new build ID with validation.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "build_id".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BuildId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Canonical Build Status
// ============================================================================

/// The canonical build status vocabulary.
///
/// Every provider's native vocabulary is mapped onto this enum by
/// [`normalize`]; the rest of the system never sees a provider-native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Running,
    Success,
    Failure,
    Unknown,
}

impl BuildStatus {
    /// Whether this status is terminal (the build will not change again).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Field-level validation failure for domain identifiers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("required field missing: {field}")]
    Required { field: String },

    #[error("field contains invalid characters: {field}")]
    InvalidCharacters { field: String },
}

/// Webhook or operator authentication failure.
///
/// Always terminal for the request; never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The HMAC secret for the route is not configured.
    #[error("HMAC secret environment variable '{var}' is not set")]
    MissingSecret { var: &'static str },

    /// The signature header was absent.
    #[error("missing webhook signature header")]
    MissingSignature,

    /// The signature header is not a hex-encoded digest of the right size.
    #[error("malformed webhook signature")]
    MalformedSignature,

    /// The signature did not match the request body.
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    /// Basic-auth credentials were absent or unparseable.
    #[error("missing credentials")]
    MissingCredentials,

    /// Basic-auth credentials did not match.
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// A registry operation referenced state that does not exist.
///
/// Indicates an ordering bug upstream, e.g. a status update delivered before
/// the corresponding queue event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("build {build} is not registered under target {target}")]
    UnknownBuild { target: TargetId, build: BuildId },

    #[error("transition from {from} to {to} rejected for build {build}")]
    RejectedTransition {
        build: BuildId,
        from: BuildStatus,
        to: BuildStatus,
    },
}

/// A CI provider query failed or returned something unusable.
///
/// Terminal for the current handler invocation; the webhook sender's retry
/// policy governs redelivery.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned HTTP {status}")]
    Api { provider: String, status: u16 },

    #[error("{provider} returned a malformed payload: {message}")]
    Malformed { provider: String, message: String },
}

/// A notification post to the review system or chat failed.
///
/// Transient failures are surfaced so the webhook sender re-drives the event;
/// permanent failures are logged and swallowed because the aggregate state
/// was already applied.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("transient notification failure via {service}: {message}")]
    Transient { service: String, message: String },

    #[error("permanent notification failure via {service}: {message}")]
    Permanent { service: String, message: String },
}

impl NotificationError {
    /// Whether the caller should let the sender's retry policy re-drive the
    /// event.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Trait seams for the external collaborators
pub mod clients;

/// Provider-native status normalization
pub mod normalize;

/// Notification dispatch to the review system and chat
pub mod notify;

/// Per-event orchestration
pub mod orchestrator;

/// Build registry and aggregate state machine
pub mod registry;

/// Inbound webhook signature verification
pub mod webhook;
