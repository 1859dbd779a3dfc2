//! Trait seams for the external collaborators.
//!
//! The orchestrator depends only on these traits; the service binary injects
//! reqwest-backed implementations at startup. Each implementation owns its
//! outbound connection resources and must put an explicit bounded timeout on
//! every call.

use crate::normalize::NativeStatus;
use crate::{BuildId, NotificationError, ProviderError, TargetId};
use async_trait::async_trait;

// ============================================================================
// Data carried across the seams
// ============================================================================

/// A build accepted by the build server's trigger endpoint.
#[derive(Debug, Clone)]
pub struct TriggeredBuild {
    pub id: BuildId,
    pub url: Option<String>,
}

/// The slice of a revision this service needs: identity plus summary text.
#[derive(Debug, Clone)]
pub struct RevisionInfo {
    pub phid: String,
    pub id: u64,
    pub author_phid: String,
    pub summary: String,
}

/// A comment transaction resolved from a trigger-CI webhook.
#[derive(Debug, Clone)]
pub struct CommentTransaction {
    pub author_phid: String,
    pub content: String,
}

/// The build-target states the review system accepts.
///
/// Coarser than [`BuildStatus`](crate::BuildStatus): the review system only
/// distinguishes in-progress, passed, and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewBuildState {
    Work,
    Pass,
    Fail,
}

impl From<crate::BuildStatus> for ReviewBuildState {
    fn from(status: crate::BuildStatus) -> Self {
        match status {
            crate::BuildStatus::Success => Self::Pass,
            crate::BuildStatus::Failure => Self::Fail,
            crate::BuildStatus::Queued
            | crate::BuildStatus::Running
            | crate::BuildStatus::Unknown => Self::Work,
        }
    }
}

impl ReviewBuildState {
    /// Wire name in the review system's build-target message API.
    pub fn as_message_type(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

// ============================================================================
// Review system
// ============================================================================

/// Client for the code-review system (revision search, build-target
/// messages, artifacts, comments).
#[async_trait]
pub trait ReviewSystem: Send + Sync {
    /// Look up a revision by its PHID.
    async fn revision_by_phid(&self, phid: &str) -> Result<RevisionInfo, ProviderError>;

    /// Replace a revision's summary text.
    async fn update_revision_summary(&self, phid: &str, summary: &str)
        -> Result<(), ProviderError>;

    /// Post a comment on a revision.
    async fn comment_on_revision(
        &self,
        revision_phid: &str,
        message: &str,
    ) -> Result<(), NotificationError>;

    /// Report a build-target state (the record reviewers gate on).
    async fn send_build_target_message(
        &self,
        target: &TargetId,
        state: ReviewBuildState,
    ) -> Result<(), NotificationError>;

    /// Keys of the artifacts already attached to a build target.
    async fn artifact_keys(&self, target: &TargetId) -> Result<Vec<String>, NotificationError>;

    /// Attach a link artifact to a build target.
    async fn create_link_artifact(
        &self,
        target: &TargetId,
        key: &str,
        name: &str,
        uri: &str,
    ) -> Result<(), NotificationError>;

    /// Resolve the comment transactions named by a trigger-CI webhook.
    async fn comment_transactions(
        &self,
        object_phid: &str,
        transaction_phids: &[String],
    ) -> Result<Vec<CommentTransaction>, ProviderError>;

    /// Members of a project, used as the trigger-CI authorization list.
    async fn project_members(&self, project_phid: &str) -> Result<Vec<String>, ProviderError>;

    /// The staging ref of the latest diff of a revision.
    async fn latest_staging_ref(&self, revision_phid: &str) -> Result<String, ProviderError>;

    /// Resolve the revision a staged diff branch belongs to.
    async fn revision_phid_for_diff(&self, diff_id: u64) -> Result<Option<String>, ProviderError>;

    /// Raw file content from the default branch of the monitored repository.
    async fn file_content_from_default_branch(&self, path: &str)
        -> Result<String, ProviderError>;
}

// ============================================================================
// CI providers
// ============================================================================

/// Client for the build server (the provider that also pushes status
/// webhooks at us).
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// Trigger one build and return its identity.
    async fn trigger_build(
        &self,
        build_type_id: &str,
        branch: &str,
        target: Option<&TargetId>,
        properties: &[(String, String)],
    ) -> Result<TriggeredBuild, ProviderError>;

    /// Rewrite a build URL so it is reachable without credentials.
    fn guest_url(&self, build_url: &str) -> String;
}

/// A provider that can be polled for the status of the default branch.
///
/// Implementations return their native vocabulary; callers go through
/// [`normalize`](crate::normalize::normalize) and never interpret the native
/// value themselves.
#[async_trait]
pub trait BranchStatusProvider: Send + Sync {
    /// Human-readable provider name, used in error and log context.
    fn name(&self) -> &str;

    async fn default_branch_status(&self) -> Result<NativeStatus, ProviderError>;
}

// ============================================================================
// Chat
// ============================================================================

/// Client for the chat system.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Post a message to a named channel.
    async fn post_message(&self, channel: &str, message: &str) -> Result<(), NotificationError>;
}
