//! # Tessera Core
//!
//! Entity resolution and cross-domain aggregation over two independent
//! ledgers: the Core order-book / perpetuals ledger and the EVM chain.
//!
//! A free-form identifier is classified, probed on both domains at once and
//! ranked into a primary candidate plus alternates. Wallet, position and token
//! views are fetched per domain, merged, and annotated with watermarks,
//! consistency, confidence and completeness so callers can tell a partial
//! answer from a complete one.

pub mod aggregator;
pub mod cache;
pub mod classifier;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod probe;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod views;

#[cfg(test)]
mod testing;

pub use aggregator::{AggregatorSettings, CrossDomainAggregator};
pub use cache::{CacheStats, SharedCache, TierTtls, TieredCache, VolatilityTier};
pub use error::*;
pub use fetcher::{CoreFetcher, DomainFetcher, EvmFetcher};
pub use models::*;
pub use probe::{CoreProbe, DomainProbe, EvmProbe};
pub use resolver::{EntityResolver, ResolverSettings};
pub use retry::RetryPolicy;
pub use service::TesseraService;
pub use views::*;
