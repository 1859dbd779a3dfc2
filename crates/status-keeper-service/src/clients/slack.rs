//! Chat client (Slack Web API).

use crate::config::ChatConfig;
use async_trait::async_trait;
use serde_json::json;
use status_keeper_core::clients::ChatClient;
use status_keeper_core::NotificationError;
use tracing::instrument;

const SERVICE: &str = "slack";

/// API errors that a retry could plausibly clear.
const TRANSIENT_API_ERRORS: &[&str] = &["ratelimited", "service_unavailable", "internal_error"];

pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SlackClient {
    pub fn new(http: reqwest::Client, config: &ChatConfig) -> Self {
        Self::with_base_url(http, config, "https://slack.com/api")
    }

    pub fn with_base_url(http: reqwest::Client, config: &ChatConfig, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    #[instrument(skip(self, message))]
    async fn post_message(&self, channel: &str, message: &str) -> Result<(), NotificationError> {
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({"channel": channel, "text": message}))
            .send()
            .await
            .map_err(|e| NotificationError::Transient {
                service: SERVICE.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() >= 500 || status.as_u16() == 429 {
            return Err(NotificationError::Transient {
                service: SERVICE.to_string(),
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(NotificationError::Permanent {
                service: SERVICE.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| NotificationError::Permanent {
                    service: SERVICE.to_string(),
                    message: e.to_string(),
                })?;
        if body["ok"].as_bool() == Some(true) {
            return Ok(());
        }

        // The API reports failure in-band with an error token, e.g.
        // channel_not_found for a bad channel.
        let error = body["error"].as_str().unwrap_or("unknown error");
        if TRANSIENT_API_ERRORS.contains(&error) {
            Err(NotificationError::Transient {
                service: SERVICE.to_string(),
                message: error.to_string(),
            })
        } else {
            Err(NotificationError::Permanent {
                service: SERVICE.to_string(),
                message: error.to_string(),
            })
        }
    }
}

#[cfg(test)]
#[path = "slack_tests.rs"]
mod slack_tests;
