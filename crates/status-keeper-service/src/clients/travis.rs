//! Branch-status client (Travis REST API).

use crate::config::BranchRestConfig;
use async_trait::async_trait;
use status_keeper_core::clients::BranchStatusProvider;
use status_keeper_core::normalize::NativeStatus;
use status_keeper_core::ProviderError;
use tracing::instrument;

const PROVIDER: &str = "travis";

pub struct TravisClient {
    http: reqwest::Client,
    base_url: String,
    repository_id: u64,
    branch: String,
}

impl TravisClient {
    pub fn new(http: reqwest::Client, config: &BranchRestConfig) -> Self {
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            repository_id: config.repository_id,
            branch: config.branch.clone(),
        }
    }
}

#[async_trait]
impl BranchStatusProvider for TravisClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self), fields(repository = self.repository_id, branch = %self.branch))]
    async fn default_branch_status(&self) -> Result<NativeStatus, ProviderError> {
        let url = format!(
            "{}/repos/{}/branches/{}",
            self.base_url, self.repository_id, self.branch
        );
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
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

        // Absent fields are legitimate (e.g. no build yet); the normalizer
        // owns the fail-closed interpretation.
        let last_build = &body["last_build"];
        Ok(NativeStatus::Travis {
            state: last_build["state"].as_str().map(String::from),
            previous_state: last_build["previous_state"].as_str().map(String::from),
        })
    }
}

#[cfg(test)]
#[path = "travis_tests.rs"]
mod travis_tests;
