use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wafwatch::analytics::{CachedGeoResolver, GeoIpService, GeoResolver};
use wafwatch::api::{self, AppState};
use wafwatch::config::{Config, DatabaseBackend};
use wafwatch::dashboard::DashboardService;
use wafwatch::enforcement::{EnforcementSink, HttpEnforcementClient};
use wafwatch::prevention::PreventionController;
use wafwatch::retry::RetryPolicy;
use wafwatch::storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(SqliteStorage::new(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.database.url, config.database.max_connections).await?)
        }
    };

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    // GeoIP
    let geoip = GeoIpService::new(config.geoip.city_db_path.as_deref())?;
    if geoip.is_available() {
        info!("🌍 GeoIP City database loaded");
    } else {
        warn!("GEOIP_CITY_DB_PATH is not set; attack origins will be empty");
    }
    let geo: Arc<dyn GeoResolver> = Arc::new(CachedGeoResolver::new(
        Arc::new(geoip),
        config.geoip.cache_max_entries,
        Duration::from_secs(config.geoip.cache_ttl_secs),
    ));

    // Enforcement service
    let enforcer: Option<Arc<dyn EnforcementSink>> =
        match HttpEnforcementClient::from_config(&config.enforcement)? {
            Some(client) => {
                info!("🛡️  Forwarding prevention mode to {}", client.endpoint());
                Some(Arc::new(client))
            }
            None => {
                warn!("WAF_API_URL is not set; prevention mode changes are only stored locally");
                None
            }
        };

    let retry = RetryPolicy::from(&config.retry);
    let state = Arc::new(AppState {
        dashboard: Arc::new(DashboardService::new(
            Arc::clone(&storage),
            geo,
            retry,
            config.analytics.clone(),
        )),
        prevention: Arc::new(PreventionController::new(Arc::clone(&storage), enforcer, retry)),
    });

    let api_router = api::create_api_router(state, &config.cors);

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    axum::serve(api_listener, api_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, closing storage");
    storage.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
