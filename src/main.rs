/// Service entry point: wires the feed client, settings, tracker and HTTP surface
use quake_tracker::clients::EarlyWarningClient;
use quake_tracker::config::{AppConfig, SettingsStore};
use quake_tracker::handlers::AppState;
use quake_tracker::routes::build_router;
use quake_tracker::services::QuakeService;
use quake_tracker::tracker::Tracker;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");
    if config.settings.reference.is_none() {
        warn!("No reference position configured; exposure estimates are disabled until one is set");
    }

    let feed = Arc::new(EarlyWarningClient::new(config.feed.clone())?);
    let settings = Arc::new(SettingsStore::new(config.settings.clone()));
    let tracker = Tracker::new(feed, settings, config.tracker.clone());
    let service = Arc::new(QuakeService::new(
        tracker,
        config.tracker.simulation_speed,
    ));

    let app = build_router(AppState {
        service: service.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("quake_tracker listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    service.shutdown();
    info!("All tracking sessions stopped");
    Ok(())
}
