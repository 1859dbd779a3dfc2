//! # Status-Keeper HTTP Service
//!
//! HTTP surface for the status-keeper CI aggregation service:
//!
//! - Signed webhook routes from the review system (`/backportCheck`,
//!   `/triggerCI`), each bound to its own HMAC secret
//! - The build server's status push (`/status`) and the build trigger
//!   endpoints (`/build`, `/buildDiff`)
//! - Operator queries behind HTTP Basic auth (`/getCurrentUser`)
//!
//! Handlers extract and authenticate; all semantics live in
//! [`status_keeper_core::orchestrator`].

pub mod auth;
pub mod errors;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod lib_tests;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use status_keeper_core::orchestrator::{BuildResultEvent, Orchestrator};
use status_keeper_core::webhook::{self, WebhookRoute, WebhookSecrets, SIGNATURE_HEADER};

use crate::auth::BasicAuthConfig;
use crate::errors::ApiError;

// ============================================================================
// Application state
// ============================================================================

/// Shared application state, constructed once at startup and injected into
/// every handler. No ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub secrets: WebhookSecrets,
    pub basic_auth: BasicAuthConfig,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/backportCheck", post(backport_check))
        .route("/triggerCI", post(trigger_ci))
        .route("/status", post(build_status))
        .route("/build", post(trigger_build))
        .route("/buildDiff", post(build_diff))
        .route("/getCurrentUser", get(get_current_user))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Signed webhook routes
// ============================================================================

fn signature_of(headers: &HeaderMap) -> Option<&str> {
    headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok())
}

#[instrument(skip_all)]
async fn backport_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event = webhook::receive(
        WebhookRoute::BackportCheck,
        &state.secrets,
        &body,
        signature_of(&headers),
    )?;
    state.orchestrator.handle(event).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip_all)]
async fn trigger_ci(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event = webhook::receive(
        WebhookRoute::TriggerCi,
        &state.secrets,
        &body,
        signature_of(&headers),
    )?;
    state.orchestrator.handle(event).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Build server routes
// ============================================================================

/// Status push from the build server.
///
/// Parsed by hand so a malformed body is an explicit 400 rather than a
/// best-guess state.
#[instrument(skip_all)]
async fn build_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event: BuildResultEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("status event: {e}")))?;
    state.orchestrator.handle_build_result(event).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct TriggerBuildParams {
    #[serde(rename = "buildTypeId")]
    build_type_id: String,

    #[serde(rename = "ref", default = "default_ref")]
    git_ref: String,

    #[serde(rename = "PHID")]
    phid: Option<String>,

    #[serde(rename = "buildName")]
    build_name: Option<String>,
}

fn default_ref() -> String {
    "master".to_string()
}

#[instrument(skip_all)]
async fn trigger_build(
    State(state): State<AppState>,
    Query(params): Query<TriggerBuildParams>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .trigger_build(
            &params.build_type_id,
            &params.git_ref,
            params.phid.as_deref(),
            params.build_name.as_deref(),
        )
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct BuildDiffParams {
    #[serde(rename = "stagingRef")]
    staging_ref: String,

    #[serde(rename = "targetPHID")]
    target_phid: String,
}

#[instrument(skip_all)]
async fn build_diff(
    State(state): State<AppState>,
    Query(params): Query<BuildDiffParams>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .build_diff(&params.staging_ref, &params.target_phid)
        .await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Operator routes
// ============================================================================

#[instrument(skip_all)]
async fn get_current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    let username = auth::authenticate(&state.basic_auth, &headers)?;
    Ok(username)
}
