use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use tessera_core::{AggregatorSettings, ResolverSettings, RetryPolicy, TierTtls};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub core_api: CoreApiConfig,
    pub evm_rpc: EvmRpcConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub aggregator: AggregatorConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoreApiConfig {
    /// `POST /info` endpoint of the Core ledger
    pub info_url: String,
    /// Block explorer endpoint, used for block lookups
    pub explorer_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvmRpcConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Average block interval, used to turn time windows into block ranges
    pub block_time_ms: u64,
    /// Upper bound on the block span of a single `eth_getLogs` call
    pub max_log_blocks: u64,
    /// Known ERC-20 tokens; symbol lookups only see these
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
    /// Fixed USD price for valuation; unpriced tokens are valued at zero
    #[serde(default)]
    pub usd_price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub immutable_secs: u64,
    pub long_secs: u64,
    pub user_analytics_secs: u64,
    pub market_secs: u64,
    pub realtime_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    pub attempt_timeout_ms: u64,
    pub branch_deadline_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("core_api.info_url", "https://api.hyperliquid.xyz/info")?
            .set_default("core_api.explorer_url", "https://rpc.hyperliquid.xyz/explorer")?
            .set_default("core_api.timeout_ms", 5_000)?
            .set_default("evm_rpc.url", "https://rpc.hyperliquid.xyz/evm")?
            .set_default("evm_rpc.timeout_ms", 5_000)?
            .set_default("evm_rpc.block_time_ms", 2_000)?
            .set_default("evm_rpc.max_log_blocks", 50_000)?
            .set_default("database.url", "http://localhost:8123")?
            .set_default("database.database", "tessera")?
            .set_default("cache.max_capacity", 10_000)?
            .set_default("cache.immutable_secs", 24 * 60 * 60)?
            .set_default("cache.long_secs", 60 * 60)?
            .set_default("cache.user_analytics_secs", 5 * 60)?
            .set_default("cache.market_secs", 30)?
            .set_default("cache.realtime_secs", 5)?
            .set_default("resolver.probe_timeout_ms", 5_000)?
            .set_default("aggregator.attempt_timeout_ms", 5_000)?
            .set_default("aggregator.branch_deadline_ms", 12_000)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 200)?
            .set_default("retry.max_delay_ms", 2_000)?
            .set_default("retry.jitter", 0.2)?
            // Load from config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (TESSERA__SERVER__PORT, etc.)
            .add_source(
                Environment::with_prefix("TESSERA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn tier_ttls(&self) -> TierTtls {
        TierTtls {
            immutable: Duration::from_secs(self.cache.immutable_secs),
            long: Duration::from_secs(self.cache.long_secs),
            user_analytics: Duration::from_secs(self.cache.user_analytics_secs),
            market: Duration::from_secs(self.cache.market_secs),
            realtime: Duration::from_secs(self.cache.realtime_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            probe_timeout: Duration::from_millis(self.resolver.probe_timeout_ms),
            retry: self.retry_policy(),
        }
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            attempt_timeout: Duration::from_millis(self.aggregator.attempt_timeout_ms),
            branch_deadline: Duration::from_millis(self.aggregator.branch_deadline_ms),
            retry: self.retry_policy(),
        }
    }
}
