use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kookaburra::config::Config;
use kookaburra::crypto::TokenCrypto;
use kookaburra::engine::{GitCliFetcher, ModalDeployer, PushPipeline};
use kookaburra::github::{AppAuth, GitHubClient, GitHubOAuth, GitHubService};
use kookaburra::session::SessionService;
use kookaburra::sms::TwilioClient;
use kookaburra::AppState;

#[derive(Parser, Debug)]
#[command(name = "kookaburra")]
#[command(author, version, about = "Push-to-deploy SMS LLMs", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "kookaburra.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting kookaburra v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db = kookaburra::db::init(&config.server.data_dir).await?;

    // Key derivation is expensive and runs exactly once
    let crypto = Arc::new(TokenCrypto::new(&config.crypto.secret, &config.crypto.salt));
    let sessions = SessionService::new(crypto);

    let app_auth = AppAuth::from_key_file(&config.github.app_id, &config.github.private_key_path)?;
    let github = Arc::new(GitHubService::new(
        app_auth,
        GitHubClient::new(),
        config.server.public_url.clone(),
    ));
    let oauth = GitHubOAuth::new(&config.github);

    let deployer = Arc::new(ModalDeployer::new(
        config.deploy.account_name.clone(),
        config.deploy.token_id.clone(),
        config.deploy.token_secret.clone(),
    ));
    let sms = Arc::new(TwilioClient::new(
        config.sms.account_sid.clone(),
        config.sms.auth_token.clone(),
    ));

    let pipeline = Arc::new(PushPipeline::new(
        db.clone(),
        github,
        Arc::new(GitCliFetcher),
        deployer,
        sms.clone(),
        config.deploy.template_dir.clone(),
        config.server.public_url.clone(),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        http: reqwest::Client::new(),
        sessions,
        oauth,
        sms,
        pipeline,
    });

    let app = kookaburra::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
