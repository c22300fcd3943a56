use renteasy_chat::{config::RelayConfig, relay::RelayServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::from_env()?;
    info!("Chat relay starting...");

    let server = RelayServer::new(config.channel_capacity);
    let app = server.router();

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Relay listening on {}", listener.local_addr()?);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
