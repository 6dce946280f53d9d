//! OAuth 2 authorization server binary

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oauth_server::config::Config;
use oauth_server::kv::MemoryStore;
use oauth_server::resolver::SystemResolver;
use oauth_server::storage::Storage;
use oauth_server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "oauth-server")]
#[command(about = "OAuth 2 authorization server with PKCE and device authorization")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 3001, env = "OAUTH_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "OAUTH_BIND")]
    bind: String,

    /// Path to config directory
    #[arg(long, default_value = "/config", env = "OAUTH_CONFIG_PATH")]
    config_path: String,

    /// Public URL for this service (used in OAuth metadata and verification URIs)
    #[arg(long, env = "OAUTH_PUBLIC_URL")]
    public_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config_path)?;
    let storage = Storage::new(&cli.config_path)?;

    if config.users.is_empty() {
        tracing::warn!("No users configured, nobody can approve authorization requests");
    }

    let state = Arc::new(AppState::new(
        config,
        storage,
        Arc::new(MemoryStore::new()),
        Arc::new(SystemResolver),
        &cli.public_url,
    )?);

    let app = router(state);

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;

    tracing::info!("Starting oauth-server on {}", addr);
    tracing::info!("Public URL: {}", cli.public_url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("OAuth server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
