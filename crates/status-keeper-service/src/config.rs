//! Service configuration, loaded from environment variables.
//!
//! Every external credential and host comes from the environment; nothing is
//! read from disk. Missing values produce a warning at startup and disable
//! the corresponding integration rather than aborting, so a dev instance can
//! run against a subset of the collaborators.

use status_keeper_core::webhook::{WebhookRoute, WebhookSecret, WebhookSecrets};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Deployment environment tag, used to select notification defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deployment {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl Deployment {
    /// Only production posts live comments on revisions; other environments
    /// log what they would have said.
    pub fn posts_live_comments(self) -> bool {
        matches!(self, Self::Prod)
    }
}

impl FromStr for Deployment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unknown deployment environment: {other}")),
        }
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        };
        write!(f, "{s}")
    }
}

/// Review-system (Conduit API) settings.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub url: String,
    pub token: String,
}

/// Build-server REST settings.
#[derive(Debug, Clone)]
pub struct BuildServerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Travis-style branch-status REST settings.
#[derive(Debug, Clone)]
pub struct BranchRestConfig {
    pub url: String,
    pub repository_id: u64,
    pub branch: String,
}

/// Cirrus-style GraphQL settings.
#[derive(Debug, Clone)]
pub struct GraphQueryConfig {
    pub url: String,
    pub owner: String,
    pub repository: String,
}

/// Chat settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub token: String,
    pub dev_channel: String,
}

/// Everything the binary needs beyond its CLI flags.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub deployment: Deployment,
    pub secrets: WebhookSecrets,
    pub webhook_username: String,
    pub webhook_password: String,
    pub review: ReviewConfig,
    pub build_server: BuildServerConfig,
    pub branch_rest: BranchRestConfig,
    pub graph_query: GraphQueryConfig,
    pub chat: ChatConfig,
    pub staging_build_type_id: String,
    pub build_config_path: String,
    pub trusted_project_phid: String,
    pub ignore_keyword: String,
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_warn(var: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| {
        warn!("{var} not set -- the corresponding integration is disabled");
        String::new()
    })
}

fn secret_from_env(route: WebhookRoute) -> Option<WebhookSecret> {
    let var = route.secret_env();
    match std::env::var(var) {
        Ok(value) => match WebhookSecret::new(value) {
            Ok(secret) => Some(secret),
            Err(_) => {
                warn!("{var} is empty -- its webhook route will reject all deliveries");
                None
            }
        },
        Err(_) => {
            warn!("{var} not set -- its webhook route will reject all deliveries");
            None
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let deployment = std::env::var("DEPLOYMENT_ENV")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("{e}; defaulting to dev");
                    None
                }
            })
            .unwrap_or_default();

        let secrets = WebhookSecrets {
            backport_check: secret_from_env(WebhookRoute::BackportCheck),
            trigger_ci: secret_from_env(WebhookRoute::TriggerCi),
        };

        let branch_rest_repo = env_or("TRAVIS_REPO_ID", "0").parse().unwrap_or_else(|_| {
            warn!("TRAVIS_REPO_ID is not numeric; defaulting to 0");
            0
        });

        Self {
            deployment,
            secrets,
            webhook_username: env_or("WEBHOOK_USERNAME", "status-keeper"),
            webhook_password: env_warn("WEBHOOK_PASSWORD"),
            review: ReviewConfig {
                url: env_or("PHABRICATOR_URL", "https://reviews.example.org"),
                token: env_warn("CONDUIT_TOKEN"),
            },
            build_server: BuildServerConfig {
                url: env_or("TEAMCITY_URL", "https://ci.example.org"),
                username: env_warn("TEAMCITY_USERNAME"),
                password: env_warn("TEAMCITY_PASSWORD"),
            },
            branch_rest: BranchRestConfig {
                url: env_or("TRAVIS_URL", "https://api.travis-ci.org"),
                repository_id: branch_rest_repo,
                branch: env_or("TRAVIS_BRANCH", "master"),
            },
            graph_query: GraphQueryConfig {
                url: env_or("CIRRUS_URL", "https://api.cirrus-ci.com"),
                owner: env_warn("CIRRUS_OWNER"),
                repository: env_warn("CIRRUS_REPOSITORY"),
            },
            chat: ChatConfig {
                token: env_warn("SLACK_BOT_TOKEN"),
                dev_channel: env_or("SLACK_DEV_CHANNEL", "dev"),
            },
            staging_build_type_id: env_or("STAGING_BUILD_TYPE_ID", "StagingDiffBuilds"),
            build_config_path: env_or("BUILD_CONFIG_PATH", "ci/build-configurations.yml"),
            trusted_project_phid: env_warn("TRUSTED_PROJECT_PHID"),
            ignore_keyword: env_or("BUILD_IGNORE_KEYWORD", "__BOTIGNORE"),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
