//! Stagehand daemon - per-team staging environment controller
//!
//! The daemon runs one staging controller and exposes:
//! - `/healthz` and `/version` for probes
//! - `/api/v1/busy` for peer controllers, guarded by a shared token

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod server;

use config::DaemonConfig;
use error::{DaemonError, DaemonResult};
use server::Server;

/// Staging daemon CLI.
#[derive(Parser)]
#[command(name = "stagehandd")]
#[command(about = "Stagehand daemon - staging environment controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STAGEHAND_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "STAGEHAND_LISTEN_ADDR")]
    listen: Option<String>,

    /// Team this controller works for
    #[arg(short, long, env = "STAGEHAND_TEAM_NAME")]
    team_name: Option<String>,

    /// Namespace the staging environment lives in
    #[arg(short, long, env = "STAGEHAND_NAMESPACE")]
    namespace: Option<String>,

    /// Auth token for the peer RPC surface
    #[arg(long, env = "STAGEHAND_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Log level
    #[arg(long, env = "STAGEHAND_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "STAGEHAND_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("invalid listen address: {e}")))?;
    }
    if let Some(team_name) = cli.team_name {
        config.staging.team_name = team_name;
    }
    if let Some(namespace) = cli.namespace {
        config.staging.namespace = namespace;
    }
    if let Some(auth_token) = cli.auth_token {
        config.staging.auth_token = auth_token;
    }

    if config.staging.team_name.is_empty() || config.staging.namespace.is_empty() {
        return Err(DaemonError::Config(
            "team name and namespace must be provided".to_string(),
        ));
    }

    let server = Server::new(config)?;
    server.run().await
}
