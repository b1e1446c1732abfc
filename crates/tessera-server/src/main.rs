mod api;
mod config;
mod db;
mod error;
mod providers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_core::{
    CoreFetcher, CoreProbe, CrossDomainAggregator, EntityResolver, EvmFetcher, EvmProbe,
    TesseraService, TieredCache,
};

use crate::config::AppConfig;
use crate::db::Database;
use crate::providers::{CoreInfoClient, EvmRpcClient};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TesseraService>,
    pub db: Database,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info,tessera_core=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .init();

    println!("================================================");
    println!("             TESSERA - Starting Up              ");
    println!("================================================");

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    println!("[CONFIG] Server: {}:{}", config.server.host, config.server.port);
    println!("[CONFIG] Database: {}", config.database.url);
    println!("[CONFIG] Core info API: {}", config.core_api.info_url);
    println!(
        "[CONFIG] EVM RPC: {} ({} registered tokens)",
        config.evm_rpc.url,
        config.evm_rpc.tokens.len()
    );
    println!(
        "[CONFIG] Cache: capacity={} realtime={}s market={}s",
        config.cache.max_capacity, config.cache.realtime_secs, config.cache.market_secs
    );

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting Tessera"
    );

    println!("[DB] Initializing ClickHouse connection...");
    let db = Database::new(&config.database);

    match db.health_check().await {
        Ok(_) => {
            println!("[DB] ClickHouse connected successfully");
            tracing::info!("Connected to ClickHouse");
        }
        Err(e) => {
            println!("[DB] WARNING: ClickHouse not available - {}", e);
            tracing::warn!(error = %e, "ClickHouse not available, Core event lookups will degrade");
        }
    }

    println!("[PROVIDERS] Initializing Core and EVM clients...");
    let core_client = Arc::new(CoreInfoClient::new(&config.core_api)?);
    let evm_client = Arc::new(EvmRpcClient::new(&config.evm_rpc)?);
    let store = Arc::new(db.clone());

    let cache = Arc::new(TieredCache::new(config.cache.max_capacity, config.tier_ttls()));

    let resolver = EntityResolver::new(
        Arc::new(CoreProbe::new(core_client.clone(), store)),
        Arc::new(EvmProbe::new(evm_client.clone())),
        config.resolver_settings(),
    );
    let aggregator = CrossDomainAggregator::new(
        Arc::new(CoreFetcher::new(core_client)),
        Arc::new(EvmFetcher::new(evm_client)),
        config.aggregator_settings(),
    )
    .with_fallback(cache.clone());
    let service = TesseraService::new(resolver, aggregator, cache);
    println!("[PROVIDERS] Resolver and aggregator ready");

    let state = AppState {
        service: Arc::new(service),
        db,
    };

    println!("[ROUTER] Setting up API routes...");
    let app = Router::new()
        .merge(api::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    println!("[ROUTER] Routes configured: /health, /api/v1/resolve, /api/v1/aggregate/*, /api/v1/cache/stats");

    let addr: SocketAddr = config.server_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("================================================");
    println!("  Server listening on http://{}", addr);
    println!("================================================");
    println!();

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
