mod app_state;
mod cards;
mod config;
mod crypto;
mod db;
mod error;
mod gateway;
mod handlers;

use clap::Parser;
use std::{sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_state::AppState;
use config::Config;
use db::init_store;
use gateway::{MockGateway, PaymentGateway, RazorpayGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardtopup_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse configuration
    let config = Arc::new(Config::parse());

    // Initialize store
    let store = init_store(&config).await?;

    let gateway: Arc<dyn PaymentGateway> = match config.gateway_credentials() {
        Some((key_id, key_secret)) => Arc::new(RazorpayGateway::new(
            &config.razorpay_base_url,
            key_id,
            key_secret,
            Duration::from_secs(config.gateway_timeout_secs),
        )?),
        None => {
            tracing::warn!("gateway credentials not set, using mock payment gateway");
            Arc::new(MockGateway)
        }
    };

    if config.webhook_secret().is_none() {
        tracing::warn!("RAZORPAY_WEBHOOK_SECRET not set, all webhooks will be rejected");
    }
    if config.direct_recharge {
        tracing::warn!("direct recharge enabled: balances can change without a captured payment");
    }

    let state = AppState::new(store, config.clone(), gateway);
    let app = handlers::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.socket_addr()).await?;

    tracing::info!("Server running on {}", config.socket_addr());
    tracing::info!("Store: {:?}", config.store);
    tracing::info!("Balance cap: ₹{}", config.balance_cap);

    axum::serve(listener, app).await?;

    Ok(())
}
