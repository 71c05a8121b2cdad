use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escrow_core::config::Config;
use escrow_core::gateway::PaystackGateway;
use escrow_core::services::{InMemoryOrderStore, TracingNotifier};
use escrow_core::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let gateway = Arc::new(PaystackGateway::new(
        config.gateway_base_url.clone(),
        config.gateway_secret_key.clone(),
        config.gateway_timeout,
    )?);
    tracing::info!(url = %config.gateway_base_url, "payment gateway client initialized");

    let orders = Arc::new(InMemoryOrderStore::new());
    let notifier = Arc::new(TracingNotifier);

    let state = AppState::build(gateway, orders, notifier, &config);
    state.spawn_background_tasks(&config);

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
