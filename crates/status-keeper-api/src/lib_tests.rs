//! Router-level tests: authentication at the boundary and handler wiring.

use super::*;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use sha2::Sha256;
use status_keeper_core::clients::{
    BranchStatusProvider, BuildServer, ChatClient, CommentTransaction, ReviewBuildState,
    ReviewSystem, RevisionInfo, TriggeredBuild,
};
use status_keeper_core::orchestrator::OrchestratorConfig;
use status_keeper_core::registry::BuildRegistry;
use status_keeper_core::webhook::WebhookSecret;
use status_keeper_core::{NotificationError, ProviderError, TargetId};
use tower::ServiceExt;

// ============================================================================
// Inert collaborators
//
// The webhook-authentication tests never reach the orchestrator; the wiring
// tests only cross paths that skip or tolerate missing external state.
// ============================================================================

struct InertReview;

#[async_trait]
impl ReviewSystem for InertReview {
    async fn revision_by_phid(&self, _phid: &str) -> Result<RevisionInfo, ProviderError> {
        unimplemented!("not exercised")
    }

    async fn update_revision_summary(
        &self,
        _phid: &str,
        _summary: &str,
    ) -> Result<(), ProviderError> {
        unimplemented!("not exercised")
    }

    async fn comment_on_revision(
        &self,
        _revision_phid: &str,
        _message: &str,
    ) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_build_target_message(
        &self,
        _target: &TargetId,
        _state: ReviewBuildState,
    ) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn artifact_keys(&self, _target: &TargetId) -> Result<Vec<String>, NotificationError> {
        Ok(Vec::new())
    }

    async fn create_link_artifact(
        &self,
        _target: &TargetId,
        _key: &str,
        _name: &str,
        _uri: &str,
    ) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn comment_transactions(
        &self,
        _object_phid: &str,
        _transaction_phids: &[String],
    ) -> Result<Vec<CommentTransaction>, ProviderError> {
        Ok(Vec::new())
    }

    async fn project_members(&self, _project_phid: &str) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    async fn latest_staging_ref(&self, _revision_phid: &str) -> Result<String, ProviderError> {
        unimplemented!("not exercised")
    }

    async fn revision_phid_for_diff(
        &self,
        _diff_id: u64,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    async fn file_content_from_default_branch(
        &self,
        _path: &str,
    ) -> Result<String, ProviderError> {
        unimplemented!("not exercised")
    }
}

struct InertBuildServer;

#[async_trait]
impl BuildServer for InertBuildServer {
    async fn trigger_build(
        &self,
        _build_type_id: &str,
        _branch: &str,
        _target: Option<&TargetId>,
        _properties: &[(String, String)],
    ) -> Result<TriggeredBuild, ProviderError> {
        unimplemented!("not exercised")
    }

    fn guest_url(&self, build_url: &str) -> String {
        build_url.to_string()
    }
}

struct InertChat;

#[async_trait]
impl ChatClient for InertChat {
    async fn post_message(&self, _channel: &str, _message: &str) -> Result<(), NotificationError> {
        Ok(())
    }
}

// ============================================================================
// Fixture
// ============================================================================

const BACKPORT_SECRET: &str = "backport-secret";
const TRIGGER_SECRET: &str = "trigger-secret";

fn app() -> Router {
    let orchestrator = Orchestrator::new(
        BuildRegistry::default(),
        Arc::new(InertReview),
        Arc::new(InertBuildServer),
        Vec::<Arc<dyn BranchStatusProvider>>::new(),
        Arc::new(InertChat),
        OrchestratorConfig {
            staging_build_type_id: "staging-builds".to_string(),
            build_config_path: "ci/build-configurations.yml".to_string(),
            trusted_project_phid: "PHID-PROJ-trusted".to_string(),
            ignore_keyword: "__BOTIGNORE".to_string(),
            dev_channel: "dev".to_string(),
        },
    );
    router(AppState {
        orchestrator: Arc::new(orchestrator),
        secrets: WebhookSecrets {
            backport_check: Some(WebhookSecret::new(BACKPORT_SECRET).unwrap()),
            trigger_ci: Some(WebhookSecret::new(TRIGGER_SECRET).unwrap()),
        },
        basic_auth: BasicAuthConfig {
            username: "status-keeper".to_string(),
            password: "hunter2".to_string(),
        },
    })
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn post(uri: &str, body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ============================================================================
// Webhook authentication
// ============================================================================

#[tokio::test]
async fn test_unsigned_webhook_rejected() {
    let response = app()
        .oneshot(post("/backportCheck", "{}", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_signature_rejected() {
    let response = app()
        .oneshot(post("/backportCheck", "{}", Some("00ff00ff")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Each route verifies against its own secret.
#[tokio::test]
async fn test_cross_route_signature_rejected() {
    let body = r#"{"object":{"type":"TASK","phid":"PHID-TASK-1"},"transactions":[]}"#;
    let signature = sign(BACKPORT_SECRET, body.as_bytes());
    let response = app()
        .oneshot(post("/triggerCI", body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_trigger_ci_accepted() {
    // Non-revision objects are acknowledged without any provider calls.
    let body = r#"{"object":{"type":"TASK","phid":"PHID-TASK-1"},"transactions":[{"phid":"PHID-XACT-1"}]}"#;
    let signature = sign(TRIGGER_SECRET, body.as_bytes());
    let response = app()
        .oneshot(post("/triggerCI", body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Build server routes
// ============================================================================

#[tokio::test]
async fn test_status_event_for_untracked_target_accepted() {
    let body = serde_json::json!({
        "buildName": "build-linux",
        "buildTypeId": "diff-builds",
        "buildResult": "success",
        "buildURL": "https://ci.example/viewLog.html?buildId=1",
        "branch": "refs/tags/phabricator/diff/42",
        "buildId": 1,
        "buildTargetPHID": "PHID-HMBT-unseen",
    });
    let response = app()
        .oneshot(post("/status", &body.to_string(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_status_event_is_bad_request() {
    let response = app()
        .oneshot(post("/status", "{\"buildName\": 7}", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unresolved_branch_is_bad_request() {
    let body = serde_json::json!({
        "buildName": "build-linux",
        "buildTypeId": "diff-builds",
        "buildResult": "success",
        "branch": "UNRESOLVED",
        "buildId": 1,
    });
    let response = app()
        .oneshot(post("/status", &body.to_string(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Operator routes
// ============================================================================

#[tokio::test]
async fn test_get_current_user_returns_username() {
    let credentials = BASE64.encode("status-keeper:hunter2");
    let request = Request::builder()
        .method("GET")
        .uri("/getCurrentUser")
        .header("authorization", format!("Basic {credentials}"))
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"status-keeper");
}

#[tokio::test]
async fn test_get_current_user_rejects_bad_password() {
    let credentials = BASE64.encode("status-keeper:wrong");
    let request = Request::builder()
        .method("GET")
        .uri("/getCurrentUser")
        .header("authorization", format!("Basic {credentials}"))
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_current_user_requires_credentials() {
    let request = Request::builder()
        .method("GET")
        .uri("/getCurrentUser")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
