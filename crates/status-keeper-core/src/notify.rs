//! Notification dispatch to the review system and chat.
//!
//! Dispatch is side effects only; the aggregate state has already been
//! applied by the time anything here runs. Callers decide, based on
//! [`NotificationError::is_transient`], whether a failure aborts the request
//! (transient, so the sender redelivers) or is logged and swallowed
//! (permanent, e.g. a bad channel).

use crate::clients::{ChatClient, ReviewBuildState, ReviewSystem};
use crate::{BuildStatus, NotificationError, TargetId};
use std::sync::Arc;
use tracing::{debug, info};

/// Posts aggregate results to the review system and chat channel.
pub struct NotificationDispatcher {
    review: Arc<dyn ReviewSystem>,
    chat: Arc<dyn ChatClient>,
    dev_channel: String,
}

impl NotificationDispatcher {
    pub fn new(review: Arc<dyn ReviewSystem>, chat: Arc<dyn ChatClient>, dev_channel: String) -> Self {
        Self {
            review,
            chat,
            dev_channel,
        }
    }

    /// Report a target's aggregate status to the review system.
    pub async fn announce_target_status(
        &self,
        target: &TargetId,
        status: BuildStatus,
    ) -> Result<(), NotificationError> {
        let state = ReviewBuildState::from(status);
        info!(%target, %status, state = state.as_message_type(), "reporting aggregate status");
        self.review.send_build_target_message(target, state).await
    }

    /// Attach a link artifact for one build, once.
    ///
    /// The artifact key is searched before creation so redelivered events do
    /// not stack duplicate links on the target.
    pub async fn announce_build_link(
        &self,
        target: &TargetId,
        build_name: &str,
        url: &str,
    ) -> Result<(), NotificationError> {
        let key = format!("{build_name}-{target}");
        let existing = self.review.artifact_keys(target).await?;
        if existing.iter().any(|k| k == &key) {
            debug!(%target, key, "build link already attached");
            return Ok(());
        }
        self.review
            .create_link_artifact(target, &key, build_name, url)
            .await
    }

    /// Comment a build result on a revision.
    pub async fn comment_build_status(
        &self,
        revision_phid: &str,
        status: BuildStatus,
        url: Option<&str>,
        build_name: &str,
    ) -> Result<(), NotificationError> {
        let message = build_status_message(status, url, build_name);
        self.review.comment_on_revision(revision_phid, &message).await
    }

    /// Post to the development channel.
    pub async fn post_dev_channel(&self, message: &str) -> Result<(), NotificationError> {
        self.chat.post_message(&self.dev_channel, message).await
    }
}

/// Render one build's result as review-system markup.
///
/// Failures carry the `(IMPORTANT)` callout so reviewers cannot miss them.
pub fn build_status_message(status: BuildStatus, url: Option<&str>, build_name: &str) -> String {
    let url = url.unwrap_or("#");
    match status {
        BuildStatus::Failure => format!("(IMPORTANT) Build [[{url} | {build_name}]] failed."),
        BuildStatus::Success => format!("Build [[{url} | {build_name}]] passed."),
        _ => format!("Build [[{url} | {build_name}]] started."),
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod notify_tests;
