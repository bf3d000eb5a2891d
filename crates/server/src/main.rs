mod chat;
mod config;
mod groups;
mod predict;
mod routes;
mod state;
mod ws;

use anyhow::Result;
use providers::openrouter::{OpenRouterClient, OpenRouterConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::ServerConfig::from_env()?;
    let chat_client = match OpenRouterConfig::from_env_and_file() {
        Ok(provider_cfg) => Some(OpenRouterClient::new(provider_cfg)?),
        Err(err) => {
            warn!("chat endpoint disabled until configured: {err}");
            None
        }
    };

    let state = state::AppState::new(
        chat_client,
        cfg.model_dir.clone(),
        Some(Arc::new(groups::InMemoryGroupLayer::new())),
    );

    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
