//! Cached entry points over the resolver and aggregator

use crate::aggregator::{normalize_domains, CrossDomainAggregator};
use crate::cache::{CacheKey, CacheStats, SharedCache, VolatilityTier};
use crate::classifier::{validate_address, validate_symbol};
use crate::error::{TesseraError, TesseraResult};
use crate::models::{Domain, EntityType, ResolutionResult, TimeWindow, UnifiedView};
use crate::resolver::EntityResolver;
use crate::views::{PositionView, TokenView, ViewKind, WalletView};

/// Tier for a resolution result, `None` when it must not be cached.
pub fn resolution_tier(result: &ResolutionResult) -> Option<VolatilityTier> {
    if result.is_degraded() {
        return None;
    }
    let tier = match result.primary.as_ref().map(|c| c.entity_type) {
        Some(EntityType::Tx | EntityType::Block) => VolatilityTier::Immutable,
        Some(EntityType::Token | EntityType::Market) => VolatilityTier::Long,
        Some(EntityType::Wallet) => VolatilityTier::UserAnalytics,
        // Not found yet; it may appear in the next block.
        None => VolatilityTier::Realtime,
    };
    Some(tier)
}

/// Degraded views are kept only briefly so recovery shows up quickly.
pub fn view_tier<T>(view: &UnifiedView<T>, healthy: VolatilityTier) -> Option<VolatilityTier> {
    if view.is_degraded() {
        Some(VolatilityTier::Realtime)
    } else {
        Some(healthy)
    }
}

pub struct TesseraService {
    resolver: EntityResolver,
    aggregator: CrossDomainAggregator,
    cache: SharedCache,
}

impl TesseraService {
    pub fn new(resolver: EntityResolver, aggregator: CrossDomainAggregator, cache: SharedCache) -> Self {
        Self {
            resolver,
            aggregator,
            cache,
        }
    }

    /// Resolve `query`; the result echoes it as given, while the cache is
    /// keyed by its trimmed form.
    pub async fn resolve(&self, query: &str) -> TesseraResult<ResolutionResult> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(TesseraError::InvalidInput("Query cannot be empty".into()));
        }
        let key = CacheKey::Resolution {
            query: trimmed.to_string(),
        };
        let mut result = self
            .cache
            .get_or_compute_with(key, resolution_tier, || self.resolver.resolve(query))
            .await?;
        // A cache hit carries the first caller's spelling
        result.query = query.to_string();
        Ok(result)
    }

    pub async fn wallet(
        &self,
        address: &str,
        domains: &[Domain],
        window: TimeWindow,
    ) -> TesseraResult<UnifiedView<WalletView>> {
        let address = validate_address(address)?;
        let domains = normalize_domains(domains)?;
        let key = CacheKey::View {
            kind: ViewKind::Wallet,
            id: address.clone(),
            domains: domains.clone(),
            window: Some(window),
        };
        self.cache
            .get_or_compute_with(
                key,
                |view| view_tier(view, VolatilityTier::UserAnalytics),
                || self.aggregator.wallet(&address, &domains, window),
            )
            .await
    }

    pub async fn positions(
        &self,
        address: &str,
        domains: &[Domain],
    ) -> TesseraResult<UnifiedView<PositionView>> {
        let address = validate_address(address)?;
        let domains = normalize_domains(domains)?;
        let key = CacheKey::View {
            kind: ViewKind::Positions,
            id: address.clone(),
            domains: domains.clone(),
            window: None,
        };
        self.cache
            .get_or_compute_with(
                key,
                |view| view_tier(view, VolatilityTier::Market),
                || self.aggregator.positions(&address, &domains),
            )
            .await
    }

    pub async fn token(&self, symbol: &str, domains: &[Domain]) -> TesseraResult<UnifiedView<TokenView>> {
        let symbol = validate_symbol(symbol)?;
        let domains = normalize_domains(domains)?;
        let key = CacheKey::View {
            kind: ViewKind::Token,
            id: symbol.clone(),
            domains: domains.clone(),
            window: None,
        };
        self.cache
            .get_or_compute_with(
                key,
                |view| view_tier(view, VolatilityTier::Market),
                || self.aggregator.token(&symbol, &domains),
            )
            .await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorSettings;
    use crate::cache::{TierTtls, TieredCache};
    use crate::error::ProviderError;
    use crate::models::ConsistencyLevel;
    use crate::resolver::ResolverSettings;
    use crate::retry::RetryPolicy;
    use crate::testing::{self, ScriptedFetcher, ScriptedProbe};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(core_probe: ScriptedProbe, core: Arc<ScriptedFetcher>) -> TesseraService {
        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        let cache = Arc::new(TieredCache::new(1_000, TierTtls::default()));
        let resolver = EntityResolver::new(
            Arc::new(core_probe),
            Arc::new(ScriptedProbe::absent(Domain::Evm)),
            ResolverSettings {
                probe_timeout: Duration::from_millis(200),
                retry: retry.clone(),
            },
        );
        let aggregator = CrossDomainAggregator::new(
            core,
            Arc::new(ScriptedFetcher::healthy(Domain::Evm, Some(10))),
            AggregatorSettings {
                attempt_timeout: Duration::from_millis(200),
                branch_deadline: Duration::from_secs(1),
                retry,
            },
        )
        .with_fallback(cache.clone());
        TesseraService::new(resolver, aggregator, cache)
    }

    #[test]
    fn test_resolution_tiers_follow_entity_type() {
        let mut result = ResolutionResult {
            query: "7".into(),
            syntactic_class: crate::models::SyntacticClass::BlockNumber,
            primary: Some(testing::core_block_candidate(7, 1.0)),
            alternates: vec![],
            resolved_at: chrono::Utc::now(),
            degraded_domains: vec![],
        };
        assert_eq!(resolution_tier(&result), Some(VolatilityTier::Immutable));

        result.primary = None;
        assert_eq!(resolution_tier(&result), Some(VolatilityTier::Realtime));

        result.degraded_domains = vec![Domain::Evm];
        assert_eq!(resolution_tier(&result), None);
    }

    #[tokio::test]
    async fn test_resolution_is_served_from_cache() {
        let probe = ScriptedProbe::found(testing::core_block_candidate(7, 1.0));
        let attempts = probe.attempts();
        let core = Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(1)));
        let service = service(probe, core);

        let first = service.resolve("7").await.unwrap();
        let second = service.resolve(" 7 ").await.unwrap();
        assert_eq!(first.primary, second.primary);
        assert_eq!(first.resolved_at, second.resolved_at);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(first.query, "7");
        assert_eq!(second.query, " 7 ");
    }

    #[tokio::test]
    async fn test_degraded_resolution_is_not_cached() {
        let probe = ScriptedProbe::failing(Domain::Core, ProviderError::BadRequest("nope".into()));
        let attempts = probe.attempts();
        let service = service(probe, Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(1))));

        service.resolve("PURR").await.unwrap();
        service.resolve("PURR").await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_view_keeps_original_metadata() {
        let core = Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(1)));
        let attempts = core.attempts();
        let service = service(ScriptedProbe::absent(Domain::Core), core);

        let first = service
            .wallet(testing::ADDRESS, &Domain::ALL, TimeWindow::Week)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = service
            .wallet(&format!("0x{}", testing::ADDRESS[2..].to_uppercase()), &[Domain::Evm, Domain::Core], TimeWindow::Week)
            .await
            .unwrap();

        assert_eq!(first.metadata.computed_at, second.metadata.computed_at);
        assert_eq!(second.metadata.consistency_level, ConsistencyLevel::Synchronized);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_identifiers_are_rejected_before_fetching() {
        let core = Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(1)));
        let attempts = core.attempts();
        let service = service(ScriptedProbe::absent(Domain::Core), core);

        let err = service
            .positions("not-an-address", &Domain::ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidInput(_)));
        let err = service.token("", &Domain::ALL).await.unwrap_err();
        assert!(matches!(err, TesseraError::InvalidInput(_)));
        assert!(matches!(
            service.resolve("  ").await.unwrap_err(),
            TesseraError::InvalidInput(_)
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_stats_count_entries() {
        let service = service(
            ScriptedProbe::absent(Domain::Core),
            Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(1))),
        );
        service.token("PURR", &Domain::ALL).await.unwrap();
        let stats = service.cache_stats().await;
        // merged view plus one last-known-good snapshot per domain
        assert_eq!(stats.entry_count, 3);
    }
}
