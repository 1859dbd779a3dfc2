//! Build-server client (TeamCity REST API).

use crate::config::BuildServerConfig;
use async_trait::async_trait;
use serde_json::json;
use status_keeper_core::clients::{BuildServer, TriggeredBuild};
use status_keeper_core::{BuildId, ProviderError, TargetId};
use tracing::instrument;

const PROVIDER: &str = "teamcity";

/// Build property carrying the review target a triggered build reports back
/// against.
const TARGET_PROPERTY: &str = "env.BUILD_TARGET_PHID";

pub struct TeamCityClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl TeamCityClient {
    pub fn new(http: reqwest::Client, config: &BuildServerConfig) -> Self {
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl BuildServer for TeamCityClient {
    #[instrument(skip(self, properties))]
    async fn trigger_build(
        &self,
        build_type_id: &str,
        branch: &str,
        target: Option<&TargetId>,
        properties: &[(String, String)],
    ) -> Result<TriggeredBuild, ProviderError> {
        let mut property_list: Vec<_> = properties
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        if let Some(target) = target {
            property_list.push(json!({"name": TARGET_PROPERTY, "value": target.as_str()}));
        }

        let body = json!({
            "branchName": branch,
            "buildType": {"id": build_type_id},
            "properties": {"property": property_list},
        });

        let response = self
            .http
            .post(format!("{}/app/rest/buildQueue", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;
        let id = body["id"].as_u64().ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "queued build without id".to_string(),
        })?;

        Ok(TriggeredBuild {
            id: BuildId::from(id),
            url: body["webUrl"].as_str().map(String::from),
        })
    }

    /// Build pages require a login by default; the guest flag makes the link
    /// readable from a review or chat message.
    fn guest_url(&self, build_url: &str) -> String {
        if build_url.contains('?') {
            format!("{build_url}&guest=1")
        } else {
            format!("{build_url}?guest=1")
        }
    }
}

#[cfg(test)]
#[path = "teamcity_tests.rs"]
mod teamcity_tests;
