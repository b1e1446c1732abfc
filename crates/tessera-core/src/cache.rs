//! Volatility-tiered cache in front of the resolver and aggregator
//!
//! Every entry carries the tier it was stored under and expires after that
//! tier's TTL. Values are stored exactly as computed, so a cached view still
//! reports the `computed_at` and watermarks of the cycle that produced it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};

use crate::models::{Domain, ResolutionResult, TimeWindow, UnifiedView};
use crate::views::{DomainSnapshot, PositionView, TokenView, ViewKind, WalletView};

/// How quickly the cached data goes out of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTier {
    /// Finalized history: transactions, blocks
    Immutable,
    /// Listings and metadata that rarely change
    Long,
    /// Per-wallet analytics
    UserAnalytics,
    /// Market statistics
    Market,
    /// Order-book level data
    Realtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTtls {
    pub immutable: Duration,
    pub long: Duration,
    pub user_analytics: Duration,
    pub market: Duration,
    pub realtime: Duration,
}

impl Default for TierTtls {
    fn default() -> Self {
        Self {
            immutable: Duration::from_secs(24 * 60 * 60),
            long: Duration::from_secs(60 * 60),
            user_analytics: Duration::from_secs(5 * 60),
            market: Duration::from_secs(30),
            realtime: Duration::from_secs(5),
        }
    }
}

impl TierTtls {
    pub fn ttl(&self, tier: VolatilityTier) -> Duration {
        match tier {
            VolatilityTier::Immutable => self.immutable,
            VolatilityTier::Long => self.long,
            VolatilityTier::UserAnalytics => self.user_analytics,
            VolatilityTier::Market => self.market,
            VolatilityTier::Realtime => self.realtime,
        }
    }
}

/// Cache key types for the different lookups
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum CacheKey {
    Resolution {
        query: String,
    },
    View {
        kind: ViewKind,
        id: String,
        domains: Vec<Domain>,
        window: Option<TimeWindow>,
    },
    /// Last-known-good fetch result of one domain
    Snapshot {
        kind: ViewKind,
        domain: Domain,
        id: String,
        window: Option<TimeWindow>,
    },
}

/// Cached value wrapper
#[derive(Debug, Clone)]
pub enum CacheValue {
    Resolution(ResolutionResult),
    WalletView(UnifiedView<WalletView>),
    PositionView(UnifiedView<PositionView>),
    TokenView(UnifiedView<TokenView>),
    WalletSnapshot(DomainSnapshot<WalletView>),
    PositionSnapshot(DomainSnapshot<PositionView>),
    TokenSnapshot(DomainSnapshot<TokenView>),
}

/// Types that can live in the cache.
pub trait Cacheable: Sized + Clone + Send + Sync + 'static {
    fn into_value(self) -> CacheValue;
    fn from_value(value: CacheValue) -> Option<Self>;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident) => {
        impl Cacheable for $ty {
            fn into_value(self) -> CacheValue {
                CacheValue::$variant(self)
            }

            fn from_value(value: CacheValue) -> Option<Self> {
                match value {
                    CacheValue::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(ResolutionResult, Resolution);
cacheable!(UnifiedView<WalletView>, WalletView);
cacheable!(UnifiedView<PositionView>, PositionView);
cacheable!(UnifiedView<TokenView>, TokenView);
cacheable!(DomainSnapshot<WalletView>, WalletSnapshot);
cacheable!(DomainSnapshot<PositionView>, PositionSnapshot);
cacheable!(DomainSnapshot<TokenView>, TokenSnapshot);

#[derive(Debug, Clone)]
struct Entry {
    tier: VolatilityTier,
    value: CacheValue,
}

struct TierExpiry {
    ttls: TierTtls,
}

impl Expiry<CacheKey, Entry> for TierExpiry {
    fn expire_after_create(&self, _key: &CacheKey, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(self.ttls.ttl(value.tier))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttls.ttl(value.tier))
    }
}

/// Shared cache; concurrent populate of one key is last-write-wins.
#[derive(Clone)]
pub struct TieredCache {
    cache: Cache<CacheKey, Entry>,
}

impl TieredCache {
    pub fn new(max_capacity: u64, ttls: TierTtls) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(TierExpiry { ttls })
            .build();

        Self { cache }
    }

    pub async fn get<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        self.cache
            .get(key)
            .await
            .and_then(|entry| T::from_value(entry.value))
    }

    pub async fn insert<T: Cacheable>(&self, key: CacheKey, tier: VolatilityTier, value: T) {
        self.cache
            .insert(
                key,
                Entry {
                    tier,
                    value: value.into_value(),
                },
            )
            .await;
    }

    /// Return the cached value or compute, store and return it. Errors are
    /// passed through and never cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: CacheKey,
        tier: VolatilityTier,
        compute: F,
    ) -> Result<T, E>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute_with(key, |_| Some(tier), compute).await
    }

    /// Like `get_or_compute`, but the tier is chosen from the computed value;
    /// `None` skips caching it.
    pub async fn get_or_compute_with<T, E, F, Fut, P>(
        &self,
        key: CacheKey,
        tier_for: P,
        compute: F,
    ) -> Result<T, E>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&T) -> Option<VolatilityTier>,
    {
        if let Some(hit) = self.get::<T>(&key).await {
            tracing::debug!(key = ?key, "Cache hit");
            return Ok(hit);
        }

        let value = compute().await?;
        match tier_for(&value) {
            Some(tier) => {
                tracing::debug!(key = ?key, tier = ?tier, "Caching computed value");
                self.insert(key, tier, value.clone()).await;
            }
            None => tracing::debug!(key = ?key, "Computed value not cacheable"),
        }
        Ok(value)
    }

    /// Get cache statistics for monitoring
    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        CacheStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: u64,
    pub weighted_size: u64,
}

/// Shared cache instance
pub type SharedCache = Arc<TieredCache>;
