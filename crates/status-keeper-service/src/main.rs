//! # Status-Keeper Service
//!
//! Binary entry point for the status-keeper CI aggregation service.
//!
//! This executable:
//! - Parses CLI flags and loads configuration from the environment
//! - Initializes logging to stdout and the configured log file
//! - Constructs the outbound clients and the orchestrator
//! - Starts the HTTP server from status-keeper-api

mod clients;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use status_keeper_api::auth::BasicAuthConfig;
use status_keeper_api::{router, AppState};
use status_keeper_core::clients::BranchStatusProvider;
use status_keeper_core::orchestrator::{Orchestrator, OrchestratorConfig};
use status_keeper_core::registry::BuildRegistry;

use crate::clients::cirrus::CirrusClient;
use crate::clients::phabricator::PhabricatorClient;
use crate::clients::slack::SlackClient;
use crate::clients::teamcity::TeamCityClient;
use crate::clients::travis::TravisClient;
use crate::config::ServiceConfig;

#[derive(Parser)]
#[command(name = "status-keeper", about = "CI status aggregation for code review")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Log file path
    #[arg(long, default_value = "log.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.log_file)?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "status_keeper_service=info,status_keeper_api=info,status_keeper_core=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();

    let config = ServiceConfig::from_env();
    info!(deployment = %config.deployment, "starting status-keeper");

    // One shared HTTP client; every outbound call inherits its timeout.
    let http = clients::http_client();
    let review = Arc::new(PhabricatorClient::new(
        http.clone(),
        &config.review,
        config.deployment,
    ));
    let build_server = Arc::new(TeamCityClient::new(http.clone(), &config.build_server));
    let branch_providers: Vec<Arc<dyn BranchStatusProvider>> = vec![
        Arc::new(CirrusClient::new(http.clone(), &config.graph_query)),
        Arc::new(TravisClient::new(http.clone(), &config.branch_rest)),
    ];
    let chat = Arc::new(SlackClient::new(http, &config.chat));

    let orchestrator = Orchestrator::new(
        BuildRegistry::default(),
        review,
        build_server,
        branch_providers,
        chat,
        OrchestratorConfig {
            staging_build_type_id: config.staging_build_type_id.clone(),
            build_config_path: config.build_config_path.clone(),
            trusted_project_phid: config.trusted_project_phid.clone(),
            ignore_keyword: config.ignore_keyword.clone(),
            dev_channel: config.chat.dev_channel.clone(),
        },
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        secrets: config.secrets.clone(),
        basic_auth: BasicAuthConfig {
            username: config.webhook_username.clone(),
            password: config.webhook_password.clone(),
        },
    };

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
