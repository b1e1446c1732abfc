use axum::{extract::State, Json};
use std::time::Instant;

use tessera_core::{
    CacheStats, PositionView, ResolutionResult, TokenView, UnifiedView, WalletView,
};

use super::dto::*;
use crate::error::AppResult;
use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let start = Instant::now();
    println!("[REQUEST] GET /health");
    tracing::info!("Processing health check request");

    let db_status = match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Database health check passed");
            "connected"
        }
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "disconnected"
        }
    };
    let cache = state.service.cache_stats().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status.to_string(),
        cache_entries: cache.entry_count,
    };

    let duration = start.elapsed().as_millis();
    println!("[RESPONSE] GET /health -> 200 OK ({}ms) db={}", duration, db_status);
    tracing::info!(
        duration_ms = %duration,
        db_status = %db_status,
        cache_entries = %cache.entry_count,
        "Health check completed"
    );

    Ok(Json(response))
}

pub async fn resolve(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> AppResult<Json<ResolutionResult>> {
    let start = Instant::now();
    println!("[REQUEST] POST /api/v1/resolve query={}", request.query);
    tracing::info!(query = %request.query, "Processing resolve request");

    let result = state.service.resolve(&request.query).await?;

    let duration = start.elapsed().as_millis();
    match &result.primary {
        Some(primary) => {
            println!(
                "[RESPONSE] POST /api/v1/resolve -> 200 OK ({}ms) {:?} on {} alternates={}",
                duration,
                primary.entity_type,
                primary.domain,
                result.alternates.len()
            );
        }
        None => {
            println!("[RESPONSE] POST /api/v1/resolve -> 200 OK ({}ms) [not found]", duration);
        }
    }
    tracing::info!(
        query = %request.query,
        duration_ms = %duration,
        found = %result.is_found(),
        alternates = %result.alternates.len(),
        degraded = %result.is_degraded(),
        "Resolve request completed"
    );

    Ok(Json(result))
}

pub async fn aggregate_wallet(
    State(state): State<AppState>,
    Json(request): Json<AggregateRequest>,
) -> AppResult<Json<UnifiedView<WalletView>>> {
    let start = Instant::now();
    println!(
        "[REQUEST] POST /api/v1/aggregate/wallet id={} domains={}",
        request.id,
        request.domain_labels()
    );
    tracing::info!(id = %request.id, "Processing wallet aggregate request");

    let domains = request.parse_domains()?;
    let window = request.parse_window()?;
    tracing::debug!(id = %request.id, domains = ?domains, window = ?window, "Aggregate parameters parsed");

    let view = state.service.wallet(&request.id, &domains, window).await?;

    let duration = start.elapsed().as_millis();
    println!(
        "[RESPONSE] POST /api/v1/aggregate/wallet -> 200 OK ({}ms) volume=${} confidence={}",
        duration, view.data.total_volume_usd, view.metadata.confidence_score
    );
    log_view_completed("wallet", &request.id, duration, &view);

    Ok(Json(view))
}

pub async fn aggregate_positions(
    State(state): State<AppState>,
    Json(request): Json<AggregateRequest>,
) -> AppResult<Json<UnifiedView<PositionView>>> {
    let start = Instant::now();
    println!(
        "[REQUEST] POST /api/v1/aggregate/positions id={} domains={}",
        request.id,
        request.domain_labels()
    );
    tracing::info!(id = %request.id, "Processing positions aggregate request");

    let domains = request.parse_domains()?;
    let view = state.service.positions(&request.id, &domains).await?;

    let duration = start.elapsed().as_millis();
    println!(
        "[RESPONSE] POST /api/v1/aggregate/positions -> 200 OK ({}ms) positions={} notional=${}",
        duration, view.data.position_count, view.data.total_notional_usd
    );
    log_view_completed("positions", &request.id, duration, &view);

    Ok(Json(view))
}

pub async fn aggregate_token(
    State(state): State<AppState>,
    Json(request): Json<AggregateRequest>,
) -> AppResult<Json<UnifiedView<TokenView>>> {
    let start = Instant::now();
    println!(
        "[REQUEST] POST /api/v1/aggregate/token id={} domains={}",
        request.id,
        request.domain_labels()
    );
    tracing::info!(id = %request.id, "Processing token aggregate request");

    let domains = request.parse_domains()?;
    let view = state.service.token(&request.id, &domains).await?;

    let duration = start.elapsed().as_millis();
    println!(
        "[RESPONSE] POST /api/v1/aggregate/token -> 200 OK ({}ms) listings={} holders={}",
        duration,
        view.data.listings.len(),
        view.data.holder_count
    );
    log_view_completed("token", &request.id, duration, &view);

    Ok(Json(view))
}

pub async fn cache_stats(State(state): State<AppState>) -> AppResult<Json<CacheStats>> {
    println!("[REQUEST] GET /api/v1/cache/stats");
    let stats = state.service.cache_stats().await;
    println!("[RESPONSE] GET /api/v1/cache/stats -> 200 OK entries={}", stats.entry_count);
    tracing::debug!(entry_count = %stats.entry_count, "Cache stats served");
    Ok(Json(stats))
}

fn log_view_completed<T>(view: &'static str, id: &str, duration: u128, result: &UnifiedView<T>) {
    tracing::info!(
        view = %view,
        id = %id,
        duration_ms = %duration,
        consistency = ?result.metadata.consistency_level,
        confidence = %result.metadata.confidence_score,
        degraded = %result.is_degraded(),
        "Aggregate request completed"
    );
}
