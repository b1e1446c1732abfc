//! Payload shapes carried by a `UnifiedView` and their merge rules
//!
//! Numeric fields sum across domains. Set-like fields concatenate and are
//! deduplicated by a domain-qualified key, so the same coin on two ledgers
//! stays two entries while a repeated entry from one ledger collapses.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{DataCompleteness, Domain};

/// `core:btc`, `evm:0xabc…`
pub fn qualified_key(domain: Domain, local: &str) -> String {
    format!("{}:{}", domain, local.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Wallet,
    Positions,
    Token,
}

// =============================================================================
// Positions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub domain: Domain,
    pub key: String,
    /// Coin on Core, token symbol on EVM
    pub instrument: String,
    pub side: PositionSide,
    /// Absolute size in instrument units
    pub size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Decimal>,
    pub notional_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
}

fn dedupe_by_key<T>(items: &mut Vec<T>, key: impl Fn(&T) -> &str) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(key(item).to_string()));
}

// =============================================================================
// View payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletView {
    pub address: String,
    pub account_value_usd: Decimal,
    pub total_volume_usd: Decimal,
    pub realized_pnl_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub net_funding_usd: Decimal,
    pub fees_paid_usd: Decimal,
    pub trade_count: u64,
    pub open_positions: Vec<PositionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub address: String,
    pub positions: Vec<PositionEntry>,
    pub total_notional_usd: Decimal,
    pub total_unrealized_pnl_usd: Decimal,
    pub position_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenListing {
    pub domain: Domain,
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenView {
    pub symbol: String,
    /// Only the Core order book quotes a price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price_usd: Option<Decimal>,
    /// 24h volume in token units
    pub volume_24h: Decimal,
    pub notional_volume_24h_usd: Decimal,
    pub trade_count_24h: u64,
    pub holder_count: u64,
    pub listings: Vec<TokenListing>,
}

/// A payload shape the aggregator can merge.
pub trait ViewPayload: Clone + Send + Sync + 'static {
    const KIND: ViewKind;

    /// Zero-valued payload for `id`, the starting point of a merge.
    fn empty(id: &str) -> Self;

    /// Add one domain's contribution.
    fn absorb(&mut self, part: &Self);

    /// Deduplicate set-like fields and recompute derived totals.
    fn finalize(&mut self) {}
}

impl ViewPayload for WalletView {
    const KIND: ViewKind = ViewKind::Wallet;

    fn empty(id: &str) -> Self {
        Self {
            address: id.to_string(),
            account_value_usd: Decimal::ZERO,
            total_volume_usd: Decimal::ZERO,
            realized_pnl_usd: Decimal::ZERO,
            unrealized_pnl_usd: Decimal::ZERO,
            net_funding_usd: Decimal::ZERO,
            fees_paid_usd: Decimal::ZERO,
            trade_count: 0,
            open_positions: Vec::new(),
        }
    }

    fn absorb(&mut self, part: &Self) {
        self.account_value_usd += part.account_value_usd;
        self.total_volume_usd += part.total_volume_usd;
        self.realized_pnl_usd += part.realized_pnl_usd;
        self.unrealized_pnl_usd += part.unrealized_pnl_usd;
        self.net_funding_usd += part.net_funding_usd;
        self.fees_paid_usd += part.fees_paid_usd;
        self.trade_count += part.trade_count;
        self.open_positions.extend(part.open_positions.iter().cloned());
    }

    fn finalize(&mut self) {
        dedupe_by_key(&mut self.open_positions, |p| &p.key);
    }
}

impl ViewPayload for PositionView {
    const KIND: ViewKind = ViewKind::Positions;

    fn empty(id: &str) -> Self {
        Self {
            address: id.to_string(),
            positions: Vec::new(),
            total_notional_usd: Decimal::ZERO,
            total_unrealized_pnl_usd: Decimal::ZERO,
            position_count: 0,
        }
    }

    fn absorb(&mut self, part: &Self) {
        self.positions.extend(part.positions.iter().cloned());
    }

    fn finalize(&mut self) {
        dedupe_by_key(&mut self.positions, |p| &p.key);
        self.total_notional_usd = self.positions.iter().map(|p| p.notional_usd).sum();
        self.total_unrealized_pnl_usd = self.positions.iter().map(|p| p.unrealized_pnl_usd).sum();
        self.position_count = self.positions.len();
    }
}

impl ViewPayload for TokenView {
    const KIND: ViewKind = ViewKind::Token;

    fn empty(id: &str) -> Self {
        Self {
            symbol: id.to_string(),
            mark_price_usd: None,
            volume_24h: Decimal::ZERO,
            notional_volume_24h_usd: Decimal::ZERO,
            trade_count_24h: 0,
            holder_count: 0,
            listings: Vec::new(),
        }
    }

    fn absorb(&mut self, part: &Self) {
        self.mark_price_usd = self.mark_price_usd.or(part.mark_price_usd);
        self.volume_24h += part.volume_24h;
        self.notional_volume_24h_usd += part.notional_volume_24h_usd;
        self.trade_count_24h += part.trade_count_24h;
        self.holder_count += part.holder_count;
        self.listings.extend(part.listings.iter().cloned());
    }

    fn finalize(&mut self) {
        dedupe_by_key(&mut self.listings, |l| &l.key);
    }
}

// =============================================================================
// Domain snapshots
// =============================================================================

/// One domain's fetch result, before merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot<T> {
    pub domain: Domain,
    pub payload: T,
    /// Highest sequence (Core) or block (EVM) observed in the fetch
    pub watermark: Option<u64>,
    /// Categories this domain delivered
    pub coverage: DataCompleteness,
    pub fetched_at: DateTime<Utc>,
}

/// Merge snapshots into one payload. Parts are folded in domain order so the
/// result does not depend on which branch finished first.
pub fn merge_payloads<T: ViewPayload>(id: &str, parts: &[&DomainSnapshot<T>]) -> T {
    let mut ordered: Vec<&DomainSnapshot<T>> = parts.to_vec();
    ordered.sort_by_key(|s| s.domain);

    let mut merged = T::empty(id);
    for snapshot in ordered {
        merged.absorb(&snapshot.payload);
    }
    merged.finalize();
    merged
}
