//! Cross-domain aggregation
//!
//! One fetch per requested domain runs concurrently. Each branch retries
//! transient failures within a per-attempt timeout and is bounded overall by
//! a branch deadline. Successful snapshots are merged; a failed branch either
//! contributes a last-known-good snapshot (stale) or nothing at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{join_all, BoxFuture};

use crate::cache::{CacheKey, Cacheable, SharedCache, VolatilityTier};
use crate::error::{DomainFailure, ProviderError, ProviderResult, TesseraError, TesseraResult};
use crate::fetcher::DomainFetcher;
use crate::models::{
    ConsistencyLevel, DataCompleteness, Domain, DomainHealth, DomainStatus, SourceWatermark,
    TimeWindow, UnifiedView, ViewMetadata,
};
use crate::retry::{with_deadline, with_retry, RetryPolicy};
use crate::views::{merge_payloads, DomainSnapshot, PositionView, TokenView, ViewPayload, WalletView};

const FRESH_SCORE: u32 = 100;
const STALE_SCORE: u32 = 20;
const FAILED_SCORE: u32 = 0;
/// Ceiling once any requested domain is not fresh
const DEGRADED_CAP: u8 = 60;

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Deadline for a single fetch attempt
    pub attempt_timeout: Duration,
    /// Deadline for a whole branch, retries and backoff included
    pub branch_deadline: Duration,
    pub retry: RetryPolicy,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            branch_deadline: Duration::from_secs(12),
            retry: RetryPolicy::default(),
        }
    }
}

/// A payload the aggregator knows how to fetch from a domain.
pub trait FetchedView: ViewPayload {
    fn fetch<'a>(
        fetcher: &'a dyn DomainFetcher,
        id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<DomainSnapshot<Self>>>;
}

impl FetchedView for WalletView {
    fn fetch<'a>(
        fetcher: &'a dyn DomainFetcher,
        id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<DomainSnapshot<Self>>> {
        fetcher.wallet(id, window)
    }
}

impl FetchedView for PositionView {
    fn fetch<'a>(
        fetcher: &'a dyn DomainFetcher,
        id: &'a str,
        _window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<DomainSnapshot<Self>>> {
        fetcher.positions(id)
    }
}

impl FetchedView for TokenView {
    fn fetch<'a>(
        fetcher: &'a dyn DomainFetcher,
        id: &'a str,
        _window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<DomainSnapshot<Self>>> {
        fetcher.token(id)
    }
}

enum Branch<T> {
    Fresh(DomainSnapshot<T>),
    Stale(DomainSnapshot<T>, ProviderError),
    Failed(Domain, ProviderError),
}

struct BranchResult<T> {
    branch: Branch<T>,
    /// What this domain delivers for the view kind when healthy
    expected: DataCompleteness,
}

impl<T> Branch<T> {
    fn domain(&self) -> Domain {
        match self {
            Branch::Fresh(s) | Branch::Stale(s, _) => s.domain,
            Branch::Failed(domain, _) => *domain,
        }
    }

    fn snapshot(&self) -> Option<&DomainSnapshot<T>> {
        match self {
            Branch::Fresh(s) | Branch::Stale(s, _) => Some(s),
            Branch::Failed(..) => None,
        }
    }

    fn health(&self) -> DomainHealth {
        let (status, error) = match self {
            Branch::Fresh(_) => (DomainStatus::Fresh, None),
            Branch::Stale(_, e) => (DomainStatus::Stale, Some(e.to_string())),
            Branch::Failed(_, e) => (DomainStatus::Failed, Some(e.to_string())),
        };
        DomainHealth {
            domain: self.domain(),
            status,
            error,
        }
    }

    fn score(&self) -> u32 {
        match self {
            Branch::Fresh(_) => FRESH_SCORE,
            Branch::Stale(..) => STALE_SCORE,
            Branch::Failed(..) => FAILED_SCORE,
        }
    }
}

pub struct CrossDomainAggregator {
    fetchers: Vec<Arc<dyn DomainFetcher>>,
    /// Last-known-good snapshots, substituted when a domain fails
    fallback: Option<SharedCache>,
    settings: AggregatorSettings,
}

impl CrossDomainAggregator {
    pub fn new(
        core: Arc<dyn DomainFetcher>,
        evm: Arc<dyn DomainFetcher>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            fetchers: vec![core, evm],
            fallback: None,
            settings,
        }
    }

    pub fn with_fallback(mut self, cache: SharedCache) -> Self {
        self.fallback = Some(cache);
        self
    }

    pub async fn wallet(
        &self,
        address: &str,
        domains: &[Domain],
        window: TimeWindow,
    ) -> TesseraResult<UnifiedView<WalletView>> {
        self.aggregate(address, domains, Some(window)).await
    }

    pub async fn positions(
        &self,
        address: &str,
        domains: &[Domain],
    ) -> TesseraResult<UnifiedView<PositionView>> {
        self.aggregate(address, domains, None).await
    }

    pub async fn token(&self, symbol: &str, domains: &[Domain]) -> TesseraResult<UnifiedView<TokenView>> {
        self.aggregate(symbol, domains, None).await
    }

    /// Fan out, merge and annotate one view.
    pub async fn aggregate<T>(
        &self,
        id: &str,
        domains: &[Domain],
        window: Option<TimeWindow>,
    ) -> TesseraResult<UnifiedView<T>>
    where
        T: FetchedView,
        DomainSnapshot<T>: Cacheable,
    {
        let start = Instant::now();
        let requested = normalize_domains(domains)?;
        if id.trim().is_empty() {
            return Err(TesseraError::InvalidInput("Identifier cannot be empty".into()));
        }

        let branches = self
            .fetchers
            .iter()
            .filter(|f| requested.contains(&f.domain()))
            .map(|f| self.run_branch::<T>(f.as_ref(), id, window));
        let results: Vec<BranchResult<T>> = join_all(branches).await;

        if results.iter().all(|r| matches!(r.branch, Branch::Failed(..))) {
            let failures = results
                .into_iter()
                .filter_map(|r| match r.branch {
                    Branch::Failed(domain, error) => Some(DomainFailure { domain, error }),
                    _ => None,
                })
                .collect();
            tracing::error!(id = %id, kind = ?T::KIND, "Every requested domain failed");
            return Err(TesseraError::TotalFailure {
                operation: "aggregate",
                failures,
            });
        }

        let parts: Vec<&DomainSnapshot<T>> = results.iter().filter_map(|r| r.branch.snapshot()).collect();
        let data = merge_payloads(id, &parts);
        let metadata = build_metadata(&results, requested.len());

        tracing::info!(
            id = %id,
            kind = ?T::KIND,
            consistency = ?metadata.consistency_level,
            confidence = %metadata.confidence_score,
            duration_ms = %start.elapsed().as_millis(),
            "Aggregation completed"
        );

        Ok(UnifiedView { data, metadata })
    }

    async fn run_branch<T>(
        &self,
        fetcher: &dyn DomainFetcher,
        id: &str,
        window: Option<TimeWindow>,
    ) -> BranchResult<T>
    where
        T: FetchedView,
        DomainSnapshot<T>: Cacheable,
    {
        let domain = fetcher.domain();
        let expected = fetcher.coverage(T::KIND);
        let label = format!("fetch:{:?}:{}", T::KIND, domain);
        let settings = &self.settings;

        let attempts = with_retry(&settings.retry, &label, || {
            with_deadline(
                settings.attempt_timeout,
                &label,
                T::fetch(fetcher, id, window.unwrap_or_default()),
            )
        });

        let outcome = match tokio::time::timeout(settings.branch_deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{} exceeded branch deadline of {}ms",
                label,
                settings.branch_deadline.as_millis()
            ))),
        };

        let key = CacheKey::Snapshot {
            kind: T::KIND,
            domain,
            id: id.to_string(),
            window,
        };

        let branch = match outcome {
            Ok(snapshot) => {
                if let Some(cache) = &self.fallback {
                    cache.insert(key, VolatilityTier::Long, snapshot.clone()).await;
                }
                Branch::Fresh(snapshot)
            }
            Err(error) => {
                let last_good = match &self.fallback {
                    Some(cache) => cache.get::<DomainSnapshot<T>>(&key).await,
                    None => None,
                };
                match last_good {
                    Some(snapshot) => {
                        tracing::warn!(
                            domain = %domain,
                            error = %error,
                            fetched_at = %snapshot.fetched_at,
                            "Fetch failed; serving last-known-good snapshot"
                        );
                        Branch::Stale(snapshot, error)
                    }
                    None => {
                        tracing::warn!(domain = %domain, error = %error, "Fetch failed; domain omitted");
                        Branch::Failed(domain, error)
                    }
                }
            }
        };

        BranchResult { branch, expected }
    }
}

/// Sort and dedupe the requested domains; an empty request is rejected.
pub fn normalize_domains(domains: &[Domain]) -> TesseraResult<Vec<Domain>> {
    let mut requested = domains.to_vec();
    requested.sort();
    requested.dedup();
    if requested.is_empty() {
        return Err(TesseraError::InvalidInput(
            "At least one domain must be requested".into(),
        ));
    }
    Ok(requested)
}

fn build_metadata<T>(results: &[BranchResult<T>], requested: usize) -> ViewMetadata {
    let mut source_watermark = SourceWatermark::default();
    for result in results {
        if let Branch::Fresh(snapshot) = &result.branch {
            if let Some(mark) = snapshot.watermark {
                source_watermark.observe(snapshot.domain, mark);
            }
        }
    }

    let all_fresh = results.iter().all(|r| matches!(r.branch, Branch::Fresh(_)));
    let any_stale = results.iter().any(|r| matches!(r.branch, Branch::Stale(..)));
    let consistency_level = if any_stale {
        ConsistencyLevel::Stale
    } else if all_fresh
        && requested == Domain::ALL.len()
        && Domain::ALL.iter().all(|d| source_watermark.get(*d).is_some())
    {
        ConsistencyLevel::Synchronized
    } else {
        ConsistencyLevel::Eventual
    };

    ViewMetadata {
        computed_at: Utc::now(),
        source_watermark,
        consistency_level,
        confidence_score: confidence_score(results, all_fresh),
        data_completeness: completeness(results),
        domains: results.iter().map(|r| r.branch.health()).collect(),
    }
}

fn confidence_score<T>(results: &[BranchResult<T>], all_fresh: bool) -> u8 {
    if results.is_empty() {
        return 0;
    }
    let total: u32 = results.iter().map(|r| r.branch.score()).sum();
    let average = u8::try_from(total / results.len() as u32).unwrap_or(u8::MAX);
    if all_fresh {
        average
    } else {
        average.min(DEGRADED_CAP)
    }
}

/// A category is complete when every requested domain that normally covers
/// it actually delivered it.
fn completeness<T>(results: &[BranchResult<T>]) -> DataCompleteness {
    let mut flags = DataCompleteness::ALL;
    for result in results {
        let delivered = result
            .branch
            .snapshot()
            .map(|s| s.coverage)
            .unwrap_or_default();
        flags.trades &= delivered.trades || !result.expected.trades;
        flags.funding &= delivered.funding || !result.expected.funding;
        flags.positions &= delivered.positions || !result.expected.positions;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{TierTtls, TieredCache};
    use crate::testing::ScriptedFetcher;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    fn fast_settings() -> AggregatorSettings {
        AggregatorSettings {
            attempt_timeout: Duration::from_millis(100),
            branch_deadline: Duration::from_secs(2),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        }
    }

    fn aggregator(core: ScriptedFetcher, evm: ScriptedFetcher) -> CrossDomainAggregator {
        CrossDomainAggregator::new(Arc::new(core), Arc::new(evm), fast_settings())
    }

    fn timeout() -> ProviderError {
        ProviderError::Timeout("upstream".into())
    }

    #[tokio::test]
    async fn test_both_healthy_is_synchronized_and_complete() {
        let view = aggregator(
            ScriptedFetcher::healthy(Domain::Core, Some(5_000)),
            ScriptedFetcher::healthy(Domain::Evm, Some(1_234)),
        )
        .wallet("0xabc", &Domain::ALL, TimeWindow::Week)
        .await
        .unwrap();

        let meta = &view.metadata;
        assert_eq!(meta.consistency_level, ConsistencyLevel::Synchronized);
        assert!(meta.data_completeness.is_complete());
        assert_eq!(meta.confidence_score, 100);
        assert_eq!(meta.source_watermark.core_seq, Some(5_000));
        assert_eq!(meta.source_watermark.evm_block, Some(1_234));
        assert_eq!(view.data.total_volume_usd, dec!(1250));
        assert_eq!(view.data.trade_count, 6);
        assert_eq!(view.data.open_positions.len(), 2);
        assert!(!view.is_degraded());
    }

    #[tokio::test]
    async fn test_one_domain_failing_degrades_view() {
        let view = aggregator(
            ScriptedFetcher::healthy(Domain::Core, Some(5_000)),
            ScriptedFetcher::failing(Domain::Evm, timeout()),
        )
        .wallet("0xabc", &Domain::ALL, TimeWindow::Week)
        .await
        .unwrap();

        let meta = &view.metadata;
        assert_ne!(meta.consistency_level, ConsistencyLevel::Synchronized);
        assert_eq!(meta.consistency_level, ConsistencyLevel::Eventual);
        // EVM covers trades and positions for wallets; funding is Core-only
        assert!(!meta.data_completeness.trades);
        assert!(!meta.data_completeness.positions);
        assert!(meta.data_completeness.funding);
        assert!(meta.confidence_score < 100);
        assert_eq!(meta.source_watermark.evm_block, None);
        assert_eq!(view.data.total_volume_usd, dec!(1000));

        let evm = meta.domains.iter().find(|d| d.domain == Domain::Evm).unwrap();
        assert_eq!(evm.status, DomainStatus::Failed);
        assert!(evm.error.is_some());
    }

    #[tokio::test]
    async fn test_core_failing_clears_every_wallet_flag() {
        let view = aggregator(
            ScriptedFetcher::failing(Domain::Core, timeout()),
            ScriptedFetcher::healthy(Domain::Evm, Some(1_234)),
        )
        .wallet("0xabc", &Domain::ALL, TimeWindow::Week)
        .await
        .unwrap();
        assert_eq!(view.metadata.data_completeness, DataCompleteness::default());
    }

    #[tokio::test]
    async fn test_confidence_increases_with_healthy_domains() {
        let one_down = aggregator(
            ScriptedFetcher::healthy(Domain::Core, Some(1)),
            ScriptedFetcher::failing(Domain::Evm, timeout()),
        )
        .positions("0xabc", &Domain::ALL)
        .await
        .unwrap();
        let all_up = aggregator(
            ScriptedFetcher::healthy(Domain::Core, Some(1)),
            ScriptedFetcher::healthy(Domain::Evm, Some(1)),
        )
        .positions("0xabc", &Domain::ALL)
        .await
        .unwrap();
        assert!(all_up.metadata.confidence_score > one_down.metadata.confidence_score);
    }

    #[tokio::test]
    async fn test_both_failing_is_total_failure() {
        let err = aggregator(
            ScriptedFetcher::failing(Domain::Core, timeout()),
            ScriptedFetcher::failing(Domain::Evm, ProviderError::BadRequest("bad".into())),
        )
        .token("PURR", &Domain::ALL)
        .await
        .unwrap_err();
        match err {
            TesseraError::TotalFailure { operation, failures } => {
                assert_eq!(operation, "aggregate");
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected total failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_domain_request_is_eventual() {
        let core = ScriptedFetcher::healthy(Domain::Core, Some(9));
        let evm = ScriptedFetcher::healthy(Domain::Evm, Some(9));
        let evm_attempts = evm.attempts();
        let view = aggregator(core, evm)
            .token("HYPE", &[Domain::Core])
            .await
            .unwrap();

        assert_eq!(view.metadata.consistency_level, ConsistencyLevel::Eventual);
        assert_eq!(view.metadata.confidence_score, 100);
        assert_eq!(view.metadata.domains.len(), 1);
        assert_eq!(evm_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_watermark_prevents_synchronized() {
        let view = aggregator(
            ScriptedFetcher::healthy(Domain::Core, Some(9)),
            ScriptedFetcher::healthy(Domain::Evm, None),
        )
        .token("PURR", &Domain::ALL)
        .await
        .unwrap();
        assert_eq!(view.metadata.consistency_level, ConsistencyLevel::Eventual);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let core = ScriptedFetcher::flaky(Domain::Core, 7, 2);
        let attempts = core.attempts();
        let view = aggregator(core, ScriptedFetcher::healthy(Domain::Evm, Some(3)))
            .positions("0xabc", &Domain::ALL)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(view.metadata.consistency_level, ConsistencyLevel::Synchronized);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let core = ScriptedFetcher::failing(Domain::Core, ProviderError::Unauthorized("key".into()));
        let attempts = core.attempts();
        aggregator(core, ScriptedFetcher::healthy(Domain::Evm, Some(3)))
            .positions("0xabc", &Domain::ALL)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempts_time_out_and_exhaust_retries() {
        let core = ScriptedFetcher::healthy(Domain::Core, Some(1)).with_delay(Duration::from_secs(1));
        let attempts = core.attempts();
        let view = aggregator(core, ScriptedFetcher::healthy(Domain::Evm, Some(3)))
            .positions("0xabc", &Domain::ALL)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let core_health = &view.metadata.domains[0];
        assert_eq!(core_health.domain, Domain::Core);
        assert_eq!(core_health.status, DomainStatus::Failed);
    }

    #[tokio::test]
    async fn test_branch_deadline_bounds_retry_budget() {
        let settings = AggregatorSettings {
            attempt_timeout: Duration::from_millis(100),
            branch_deadline: Duration::from_millis(150),
            retry: RetryPolicy::new(10, Duration::from_millis(1)),
        };
        let core = ScriptedFetcher::healthy(Domain::Core, Some(1)).with_delay(Duration::from_secs(1));
        let attempts = core.attempts();
        let aggregator = CrossDomainAggregator::new(
            Arc::new(core),
            Arc::new(ScriptedFetcher::healthy(Domain::Evm, Some(3))),
            settings,
        );

        let started = Instant::now();
        aggregator.positions("0xabc", &Domain::ALL).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(attempts.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn test_failed_domain_falls_back_to_last_known_good() {
        let cache = Arc::new(TieredCache::new(100, TierTtls::default()));
        let evm = Arc::new(ScriptedFetcher::healthy(Domain::Evm, Some(1_234)));
        let aggregator = CrossDomainAggregator::new(
            Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(5_000))),
            evm.clone(),
            fast_settings(),
        )
        .with_fallback(cache);

        let first = aggregator
            .wallet("0xabc", &Domain::ALL, TimeWindow::Week)
            .await
            .unwrap();
        assert_eq!(first.metadata.consistency_level, ConsistencyLevel::Synchronized);

        evm.set_error(Some(timeout()));
        let second = aggregator
            .wallet("0xabc", &Domain::ALL, TimeWindow::Week)
            .await
            .unwrap();

        let meta = &second.metadata;
        assert_eq!(meta.consistency_level, ConsistencyLevel::Stale);
        assert_eq!(meta.source_watermark.evm_block, None);
        assert!(meta.confidence_score <= DEGRADED_CAP);
        assert!(meta.confidence_score > 0);
        assert!(meta.data_completeness.trades);
        assert_eq!(second.data.total_volume_usd, first.data.total_volume_usd);
        let evm_health = meta.domains.iter().find(|d| d.domain == Domain::Evm).unwrap();
        assert_eq!(evm_health.status, DomainStatus::Stale);
    }

    #[tokio::test]
    async fn test_fallback_is_scoped_to_window() {
        let cache = Arc::new(TieredCache::new(100, TierTtls::default()));
        let evm = Arc::new(ScriptedFetcher::healthy(Domain::Evm, Some(1)));
        let aggregator = CrossDomainAggregator::new(
            Arc::new(ScriptedFetcher::healthy(Domain::Core, Some(1))),
            evm.clone(),
            fast_settings(),
        )
        .with_fallback(cache);

        aggregator.wallet("0xabc", &Domain::ALL, TimeWindow::Day).await.unwrap();
        evm.set_error(Some(timeout()));
        let view = aggregator
            .wallet("0xabc", &Domain::ALL, TimeWindow::Month)
            .await
            .unwrap();
        assert_eq!(view.metadata.consistency_level, ConsistencyLevel::Eventual);
    }

    #[tokio::test]
    async fn test_empty_domain_list_is_invalid_input() {
        let err = aggregator(
            ScriptedFetcher::healthy(Domain::Core, Some(1)),
            ScriptedFetcher::healthy(Domain::Evm, Some(1)),
        )
        .wallet("0xabc", &[], TimeWindow::Week)
        .await
        .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidInput(_)));
    }

    #[test]
    fn test_normalize_domains_dedupes_and_orders() {
        let domains = normalize_domains(&[Domain::Evm, Domain::Core, Domain::Evm]).unwrap();
        assert_eq!(domains, vec![Domain::Core, Domain::Evm]);
    }
}
