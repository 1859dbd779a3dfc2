//! Tests for environment-backed configuration.
//!
//! Environment variables are process-global, so these run serialized.

use super::*;
use serial_test::serial;

fn clear_env() {
    for var in [
        "DEPLOYMENT_ENV",
        "HMAC_BACKPORT_CHECK",
        "HMAC_TRIGGER_CI",
        "WEBHOOK_USERNAME",
        "WEBHOOK_PASSWORD",
        "PHABRICATOR_URL",
        "CONDUIT_TOKEN",
        "TEAMCITY_URL",
        "TEAMCITY_USERNAME",
        "TEAMCITY_PASSWORD",
        "TRAVIS_URL",
        "TRAVIS_REPO_ID",
        "TRAVIS_BRANCH",
        "CIRRUS_URL",
        "CIRRUS_OWNER",
        "CIRRUS_REPOSITORY",
        "SLACK_BOT_TOKEN",
        "SLACK_DEV_CHANNEL",
        "STAGING_BUILD_TYPE_ID",
        "BUILD_CONFIG_PATH",
        "TRUSTED_PROJECT_PHID",
        "BUILD_IGNORE_KEYWORD",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_with_empty_environment() {
    clear_env();
    let config = ServiceConfig::from_env();

    assert_eq!(config.deployment, Deployment::Dev);
    assert!(config.secrets.backport_check.is_none());
    assert!(config.secrets.trigger_ci.is_none());
    assert_eq!(config.webhook_username, "status-keeper");
    assert_eq!(config.branch_rest.url, "https://api.travis-ci.org");
    assert_eq!(config.branch_rest.branch, "master");
    assert_eq!(config.ignore_keyword, "__BOTIGNORE");
}

#[test]
#[serial]
fn test_secrets_loaded_per_route() {
    clear_env();
    std::env::set_var("HMAC_BACKPORT_CHECK", "bp-secret");
    let config = ServiceConfig::from_env();

    assert!(config.secrets.backport_check.is_some());
    assert!(config.secrets.trigger_ci.is_none());
    clear_env();
}

#[test]
#[serial]
fn test_deployment_parsing() {
    clear_env();
    std::env::set_var("DEPLOYMENT_ENV", "prod");
    let config = ServiceConfig::from_env();
    assert_eq!(config.deployment, Deployment::Prod);
    assert!(config.deployment.posts_live_comments());

    std::env::set_var("DEPLOYMENT_ENV", "not-a-deployment");
    let config = ServiceConfig::from_env();
    assert_eq!(config.deployment, Deployment::Dev);
    assert!(!config.deployment.posts_live_comments());
    clear_env();
}

#[test]
#[serial]
fn test_empty_secret_disables_route() {
    clear_env();
    std::env::set_var("HMAC_TRIGGER_CI", "");
    let config = ServiceConfig::from_env();
    assert!(config.secrets.trigger_ci.is_none());
    clear_env();
}
