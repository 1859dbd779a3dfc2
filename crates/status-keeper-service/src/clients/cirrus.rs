//! Branch-status client (Cirrus GraphQL API).

use crate::config::GraphQueryConfig;
use async_trait::async_trait;
use serde_json::json;
use status_keeper_core::clients::BranchStatusProvider;
use status_keeper_core::normalize::NativeStatus;
use status_keeper_core::ProviderError;
use tracing::instrument;

const PROVIDER: &str = "cirrus";

const BRANCH_STATUS_QUERY: &str = "\
query ($owner: String!, $name: String!) {\
  ownerRepository(platform: \"github\", owner: $owner, name: $name) {\
    lastDefaultBranchBuild { status }\
  }\
}";

pub struct CirrusClient {
    http: reqwest::Client,
    base_url: String,
    owner: String,
    repository: String,
}

impl CirrusClient {
    pub fn new(http: reqwest::Client, config: &GraphQueryConfig) -> Self {
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repository: config.repository.clone(),
        }
    }
}

#[async_trait]
impl BranchStatusProvider for CirrusClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self), fields(owner = %self.owner, repository = %self.repository))]
    async fn default_branch_status(&self) -> Result<NativeStatus, ProviderError> {
        let body = json!({
            "query": BRANCH_STATUS_QUERY,
            "variables": {"owner": self.owner, "name": self.repository},
        });

        let response = self
            .http
            .post(format!("{}/graphql", self.base_url))
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
        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(ProviderError::Request {
                    provider: PROVIDER.to_string(),
                    message: errors[0]["message"].as_str().unwrap_or("query failed").to_string(),
                });
            }
        }

        // A missing key anywhere means "no build yet"; the normalizer maps
        // that to Unknown.
        let status = body["data"]["ownerRepository"]["lastDefaultBranchBuild"]["status"]
            .as_str()
            .map(String::from);
        Ok(NativeStatus::Cirrus { status })
    }
}

#[cfg(test)]
#[path = "cirrus_tests.rs"]
mod cirrus_tests;
