//! Review-system client (Conduit API).
//!
//! All calls go through the Conduit endpoint convention: form-encoded POST to
//! `/api/<method>` with the token as `api.token`, PHP-style bracketed keys
//! for nested constraints, and a `{result, error_code, error_info}` envelope.

use crate::clients::as_notification;
use crate::config::{Deployment, ReviewConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use status_keeper_core::clients::{
    CommentTransaction, ReviewBuildState, ReviewSystem, RevisionInfo,
};
use status_keeper_core::{NotificationError, ProviderError, TargetId};
use tracing::{debug, info, instrument};

const PROVIDER: &str = "phabricator";

pub struct PhabricatorClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    post_live_comments: bool,
}

impl PhabricatorClient {
    pub fn new(http: reqwest::Client, config: &ReviewConfig, deployment: Deployment) -> Self {
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            post_live_comments: deployment.posts_live_comments(),
        }
    }

    fn request_error(err: reqwest::Error) -> ProviderError {
        ProviderError::Request {
            provider: PROVIDER.to_string(),
            message: err.to_string(),
        }
    }

    fn malformed(message: impl Into<String>) -> ProviderError {
        ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: message.into(),
        }
    }

    /// Invoke one Conduit method and unwrap its result envelope.
    async fn call(&self, method: &str, params: Vec<(String, String)>) -> Result<Value, ProviderError> {
        let url = format!("{}/api/{}", self.base_url, method);
        let mut form = vec![("api.token".to_string(), self.token.clone())];
        form.extend(params);

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(Self::request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| Self::malformed(e.to_string()))?;
        if let Some(info) = body.get("error_info").and_then(Value::as_str) {
            return Err(ProviderError::Request {
                provider: PROVIDER.to_string(),
                message: format!("{method}: {info}"),
            });
        }
        Ok(body["result"].take())
    }

    /// The sole element of a search result, or a malformed-payload error.
    fn single(method: &str, result: &Value) -> Result<Value, ProviderError> {
        let data = result["data"]
            .as_array()
            .ok_or_else(|| Self::malformed(format!("{method}: missing data")))?;
        match data.as_slice() {
            [one] => Ok(one.clone()),
            other => Err(Self::malformed(format!(
                "{method}: expected 1 result, got {}",
                other.len()
            ))),
        }
    }
}

fn p(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

#[async_trait]
impl ReviewSystem for PhabricatorClient {
    #[instrument(skip(self))]
    async fn revision_by_phid(&self, phid: &str) -> Result<RevisionInfo, ProviderError> {
        let result = self
            .call(
                "differential.revision.search",
                vec![p("constraints[phids][0]", phid)],
            )
            .await?;
        let revision = Self::single("differential.revision.search", &result)?;

        Ok(RevisionInfo {
            phid: phid.to_string(),
            id: revision["id"]
                .as_u64()
                .ok_or_else(|| Self::malformed("revision without id"))?,
            author_phid: revision["fields"]["authorPHID"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            summary: revision["fields"]["summary"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn update_revision_summary(
        &self,
        phid: &str,
        summary: &str,
    ) -> Result<(), ProviderError> {
        self.call(
            "differential.revision.edit",
            vec![
                p("objectIdentifier", phid),
                p("transactions[0][type]", "summary"),
                p("transactions[0][value]", summary),
            ],
        )
        .await?;
        Ok(())
    }

    async fn comment_on_revision(
        &self,
        revision_phid: &str,
        message: &str,
    ) -> Result<(), NotificationError> {
        info!(revision = revision_phid, message, "commenting on revision");
        if !self.post_live_comments {
            // Non-production deployments only log what they would have said.
            debug!("comment skipped outside production");
            return Ok(());
        }
        self.call(
            "differential.revision.edit",
            vec![
                p("objectIdentifier", revision_phid),
                p("transactions[0][type]", "comment"),
                p("transactions[0][value]", message),
            ],
        )
        .await
        .map(|_| ())
        .map_err(|e| as_notification(PROVIDER, e))
    }

    async fn send_build_target_message(
        &self,
        target: &TargetId,
        state: ReviewBuildState,
    ) -> Result<(), NotificationError> {
        self.call(
            "harbormaster.sendmessage",
            vec![
                p("receiver", target.as_str()),
                p("type", state.as_message_type()),
            ],
        )
        .await
        .map(|_| ())
        .map_err(|e| as_notification(PROVIDER, e))
    }

    async fn artifact_keys(&self, target: &TargetId) -> Result<Vec<String>, NotificationError> {
        let result = self
            .call(
                "harbormaster.artifact.search",
                vec![p("constraints[buildTargetPHIDs][0]", target.as_str())],
            )
            .await
            .map_err(|e| as_notification(PROVIDER, e))?;

        let keys = result["data"]
            .as_array()
            .map(|artifacts| {
                artifacts
                    .iter()
                    .filter_map(|a| a["fields"]["artifactKey"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }

    async fn create_link_artifact(
        &self,
        target: &TargetId,
        key: &str,
        name: &str,
        uri: &str,
    ) -> Result<(), NotificationError> {
        self.call(
            "harbormaster.createartifact",
            vec![
                p("buildTargetPHID", target.as_str()),
                p("artifactKey", key),
                p("artifactType", "uri"),
                p("artifactData[uri]", uri),
                p("artifactData[name]", name),
                p("artifactData[ui.external]", "true"),
            ],
        )
        .await
        .map(|_| ())
        .map_err(|e| as_notification(PROVIDER, e))
    }

    async fn comment_transactions(
        &self,
        object_phid: &str,
        transaction_phids: &[String],
    ) -> Result<Vec<CommentTransaction>, ProviderError> {
        let mut params = vec![p("objectIdentifier", object_phid)];
        for (i, phid) in transaction_phids.iter().enumerate() {
            params.push(p(&format!("constraints[phids][{i}]"), phid));
        }
        let result = self.call("transaction.search", params).await?;

        let mut comments = Vec::new();
        for transaction in result["data"].as_array().into_iter().flatten() {
            if transaction["type"].as_str() != Some("comment") {
                continue;
            }
            let author = transaction["authorPHID"].as_str().unwrap_or_default();
            for comment in transaction["comments"].as_array().into_iter().flatten() {
                if let Some(raw) = comment["content"]["raw"].as_str() {
                    comments.push(CommentTransaction {
                        author_phid: author.to_string(),
                        content: raw.to_string(),
                    });
                }
            }
        }
        Ok(comments)
    }

    async fn project_members(&self, project_phid: &str) -> Result<Vec<String>, ProviderError> {
        let result = self
            .call(
                "project.search",
                vec![
                    p("constraints[phids][0]", project_phid),
                    p("attachments[members]", "true"),
                ],
            )
            .await?;
        let project = Self::single("project.search", &result)?;

        let members = project["attachments"]["members"]["members"]
            .as_array()
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| m["phid"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(members)
    }

    async fn latest_staging_ref(&self, revision_phid: &str) -> Result<String, ProviderError> {
        let result = self
            .call(
                "differential.diff.search",
                vec![
                    p("constraints[revisionPHIDs][0]", revision_phid),
                    p("order", "newest"),
                    p("limit", "1"),
                ],
            )
            .await?;
        let diff = Self::single("differential.diff.search", &result)?;
        let diff_id = diff["id"]
            .as_u64()
            .ok_or_else(|| Self::malformed("diff without id"))?;
        Ok(format!("refs/tags/phabricator/diff/{diff_id}"))
    }

    async fn revision_phid_for_diff(&self, diff_id: u64) -> Result<Option<String>, ProviderError> {
        let result = self
            .call(
                "differential.diff.search",
                vec![p("constraints[ids][0]", diff_id.to_string())],
            )
            .await?;
        let Some(diff) = result["data"].as_array().and_then(|d| d.first()) else {
            return Ok(None);
        };
        Ok(diff["fields"]["revisionPHID"].as_str().map(String::from))
    }

    async fn file_content_from_default_branch(
        &self,
        path: &str,
    ) -> Result<String, ProviderError> {
        let result = self
            .call(
                "diffusion.filecontentquery",
                vec![p("path", path), p("branch", "master")],
            )
            .await?;
        let file_phid = result["filePHID"]
            .as_str()
            .ok_or_else(|| Self::malformed(format!("no file PHID for {path}")))?;

        let result = self
            .call("file.download", vec![p("phid", file_phid)])
            .await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| Self::malformed("file.download returned no content"))?;
        let decoded = BASE64
            .decode(encoded)
            .map_err(|e| Self::malformed(format!("file content is not base64: {e}")))?;
        String::from_utf8(decoded).map_err(|e| Self::malformed(format!("file content: {e}")))
    }
}

#[cfg(test)]
#[path = "phabricator_tests.rs"]
mod phabricator_tests;
