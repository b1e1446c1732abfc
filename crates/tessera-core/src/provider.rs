//! Collaborator contracts for the per-domain data providers
//!
//! The core never talks to a network itself. It is handed implementations of
//! these traits (HTTP clients in the server, in-memory fakes in tests) and
//! only interprets what they return.
//!
//! Absence is `Ok(None)`; `Err` is reserved for transport and upstream faults.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::models::TimeRange;

// =============================================================================
// Core ledger records
// =============================================================================

/// Margin account state of a Core address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreAccountState {
    pub address: String,
    pub account_value_usd: Decimal,
    pub total_margin_used_usd: Decimal,
    pub withdrawable_usd: Decimal,
    pub positions: Vec<CorePosition>,
    /// Ledger time (ms) at which the state was read
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorePosition {
    pub coin: String,
    /// Signed size: negative for shorts
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub position_value_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub leverage: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreFill {
    pub coin: String,
    pub side: FillSide,
    pub price: Decimal,
    pub size: Decimal,
    pub closed_pnl_usd: Decimal,
    pub fee_usd: Decimal,
    pub hash: String,
    pub tid: u64,
    /// Epoch millis
    pub time: i64,
}

impl CoreFill {
    pub fn notional_usd(&self) -> Decimal {
        self.price * self.size.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreFunding {
    pub coin: String,
    /// Positive when received, negative when paid
    pub usdc: Decimal,
    pub funding_rate: Decimal,
    /// Epoch millis
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreBlock {
    pub height: u64,
    pub hash: String,
    /// Epoch millis
    pub time: i64,
    pub transaction_count: u32,
    pub proposer: String,
}

/// A perpetuals market and its 24h context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMarket {
    pub name: String,
    pub max_leverage: u32,
    pub mark_price: Decimal,
    pub day_notional_volume_usd: Decimal,
    pub day_base_volume: Decimal,
    pub open_interest: Decimal,
    pub funding_rate: Decimal,
    pub sequence: u64,
}

/// A spot token listed on the Core order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreToken {
    pub name: String,
    pub token_id: String,
    pub index: u32,
    pub sz_decimals: u8,
    pub evm_contract: Option<String>,
    pub mark_price: Option<Decimal>,
    pub day_base_volume: Decimal,
    pub day_notional_volume_usd: Decimal,
    pub sequence: u64,
}

/// An off-chain indexed economic event from the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: String,
    pub dedupe_key: String,
    pub wallet: String,
    pub kind: String,
    pub coin: String,
    pub usd_value: Decimal,
    /// Epoch millis
    pub time: i64,
    pub sequence: u64,
}

// =============================================================================
// EVM chain records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmAccount {
    pub address: String,
    /// Native balance in whole units
    pub balance: Decimal,
    pub nonce: u64,
    pub is_contract: bool,
    pub block_number: u64,
}

impl EvmAccount {
    /// An EVM account always "exists"; it only counts once it has been used.
    pub fn has_activity(&self) -> bool {
        self.is_contract || self.nonce > 0 || !self.balance.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTransaction {
    pub hash: String,
    /// `None` while pending
    pub block_number: Option<u64>,
    pub from: String,
    pub to: Option<String>,
    pub value: Decimal,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmBlock {
    pub number: u64,
    pub hash: String,
    /// Epoch seconds
    pub timestamp: i64,
    pub transaction_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmToken {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
    pub total_supply: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTransfer {
    pub symbol: String,
    pub contract: String,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub usd_value: Decimal,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTokenBalance {
    pub symbol: String,
    pub contract: String,
    pub amount: Decimal,
    pub usd_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTokenActivity {
    pub symbol: String,
    pub contract: String,
    pub transfer_count: u64,
    pub volume: Decimal,
    pub holder_count: u64,
}

/// An EVM response together with the block height it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed<T> {
    pub data: T,
    pub block_number: u64,
}

// =============================================================================
// Provider contracts
// =============================================================================

/// Data provider for the Core order-book / perpetuals ledger.
#[async_trait]
pub trait CoreProvider: Send + Sync {
    /// Margin state, or `None` for an address that never used the ledger.
    async fn clearinghouse_state(&self, address: &str) -> ProviderResult<Option<CoreAccountState>>;

    async fn block(&self, height: u64) -> ProviderResult<Option<CoreBlock>>;

    async fn perp_market(&self, name: &str) -> ProviderResult<Option<CoreMarket>>;

    async fn spot_token(&self, name: &str) -> ProviderResult<Option<CoreToken>>;

    async fn fills(&self, address: &str, range: TimeRange) -> ProviderResult<Vec<CoreFill>>;

    async fn funding(&self, address: &str, range: TimeRange) -> ProviderResult<Vec<CoreFunding>>;
}

/// Data provider for the EVM chain.
#[async_trait]
pub trait EvmProvider: Send + Sync {
    async fn transaction(&self, hash: &str) -> ProviderResult<Option<EvmTransaction>>;

    async fn block_by_number(&self, number: u64) -> ProviderResult<Option<EvmBlock>>;

    async fn block_by_hash(&self, hash: &str) -> ProviderResult<Option<EvmBlock>>;

    async fn account(&self, address: &str) -> ProviderResult<EvmAccount>;

    async fn token_by_symbol(&self, symbol: &str) -> ProviderResult<Option<EvmToken>>;

    async fn token_by_address(&self, address: &str) -> ProviderResult<Option<EvmToken>>;

    async fn transfers(
        &self,
        address: &str,
        range: TimeRange,
    ) -> ProviderResult<Observed<Vec<EvmTransfer>>>;

    async fn token_balances(&self, address: &str) -> ProviderResult<Observed<Vec<EvmTokenBalance>>>;

    async fn token_activity(
        &self,
        token: &EvmToken,
        range: TimeRange,
    ) -> ProviderResult<Observed<EvmTokenActivity>>;
}

/// Relational store of off-chain indexed Core events.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn event_by_id(&self, id: &str) -> ProviderResult<Option<LedgerEvent>>;

    async fn event_by_dedupe_key(&self, key: &str) -> ProviderResult<Option<LedgerEvent>>;
}
