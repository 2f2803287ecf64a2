//! OpenSASE Marketplace - channel sync and order operations service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_marketplace::api::{router, AppState};
use opensase_marketplace::config::Config;
use opensase_marketplace::events::EventPublisher;
use opensase_marketplace::marketplace::{HttpMarketplaceClient, ReconciliationEngine, SyncScheduler};
use opensase_marketplace::orders::{LogSender, OrderService};
use opensase_marketplace::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!("NATS unavailable, events will only be logged: {}", e);
                None
            }
        },
        None => None,
    };
    let publisher = EventPublisher::new(nats);

    let store = Arc::new(PgStore::new(db));
    let client = Arc::new(HttpMarketplaceClient::new(&config.marketplace.base_url, config.marketplace.timeout)?);
    let engine = Arc::new(ReconciliationEngine::new(store.clone(), client, config.marketplace.clone(), publisher.clone()));
    let orders = Arc::new(OrderService::new(store, publisher, &config.marketplace.channel, &config.default_currency));
    let shutdown = CancellationToken::new();

    let scheduler = config.sync_interval.map(|interval| tokio::spawn(SyncScheduler::new(engine.clone(), interval, shutdown.clone()).run()));
    if scheduler.is_none() { tracing::info!("Scheduled sync disabled (SYNC_INTERVAL_SECS=0)"); }

    let app = router(AppState { engine, orders, sender: Arc::new(LogSender), shutdown: shutdown.clone() });

    tracing::info!("🚀 OpenSASE Marketplace listening on 0.0.0.0:{} (channel {})", config.port, config.marketplace.channel);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler { let _ = handle.await; }
    Ok(())
}
