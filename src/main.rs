// src/main.rs

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feide_oidc::client::OidcClient;
use feide_oidc::config::{LoginSettings, ResourceServerSettings};
use feide_oidc::flow::LoginFlow;
use feide_oidc::resource::DataSource;
use feide_oidc::server;
use feide_oidc::session::MemorySessions;

#[derive(Debug, Parser)]
#[command(name = "feide-oidc", version, about = "Feide OpenID Connect login app and data-source API")]
struct Cli {
    /// Default log filter when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the login app (relying party).
    Login {
        #[arg(long, env = "FEIDE_OIDC_CONFIG")]
        config: PathBuf,
    },
    /// Run the data-source API (resource server).
    ResourceServer {
        #[arg(long, env = "FEIDE_OIDC_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Login { config } => run_login(config).await,
        Command::ResourceServer { config } => run_resource_server(config).await,
    }
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_login(path: PathBuf) -> Result<()> {
    let settings = LoginSettings::from_yaml_file(&path)
        .with_context(|| format!("loading login settings from {}", path.display()))?;
    let client = OidcClient::new(settings.client_config()?)?;
    let flow = LoginFlow::new(client, &settings)?;
    let sessions = MemorySessions::new(Duration::from_secs(settings.session_ttl_secs));

    tracing::info!(issuer = %settings.issuer, "Starting login app");
    serve(&settings.listen_addr, server::login::router(flow, sessions, settings.secure_cookie())).await
}

async fn run_resource_server(path: PathBuf) -> Result<()> {
    let settings = ResourceServerSettings::from_yaml_file(&path)
        .with_context(|| format!("loading resource server settings from {}", path.display()))?;
    let client = OidcClient::new(settings.client_config()?)?;
    let datasource = DataSource::new(client, &settings);

    tracing::info!(
        issuer = %settings.issuer,
        audience = %settings.datasource_audience,
        "Starting data-source API"
    );
    serve(&settings.listen_addr, server::resource::router(datasource)).await
}

async fn serve(addr: &str, app: axum::Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
