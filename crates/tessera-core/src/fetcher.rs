//! Per-domain fetchers
//!
//! Each fetcher turns one ledger's raw records into the shared payload shapes
//! and reports the watermark it observed. Fetchers never merge; that is the
//! aggregator's job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::ProviderResult;
use crate::models::{DataCompleteness, Domain, TimeWindow};
use crate::provider::{
    CoreAccountState, CorePosition, CoreProvider, EvmProvider, EvmTokenBalance,
};
use crate::views::{
    qualified_key, DomainSnapshot, PositionEntry, PositionSide, PositionView, TokenListing,
    TokenView, ViewKind, ViewPayload, WalletView,
};

const TRADES_ONLY: DataCompleteness = DataCompleteness {
    trades: true,
    funding: false,
    positions: false,
};

const POSITIONS_ONLY: DataCompleteness = DataCompleteness {
    trades: false,
    funding: false,
    positions: true,
};

const TRADES_AND_POSITIONS: DataCompleteness = DataCompleteness {
    trades: true,
    funding: false,
    positions: true,
};

/// Data categories a healthy domain delivers for a view kind. Core carries
/// funding; EVM has no funding concept.
pub fn coverage(domain: Domain, kind: ViewKind) -> DataCompleteness {
    match (domain, kind) {
        (Domain::Core, ViewKind::Wallet) => DataCompleteness::ALL,
        (Domain::Evm, ViewKind::Wallet) => TRADES_AND_POSITIONS,
        (_, ViewKind::Positions) => POSITIONS_ONLY,
        (_, ViewKind::Token) => TRADES_ONLY,
    }
}

#[async_trait]
pub trait DomainFetcher: Send + Sync {
    fn domain(&self) -> Domain;

    /// Data categories this domain delivers for a view kind when healthy.
    fn coverage(&self, kind: ViewKind) -> DataCompleteness;

    async fn wallet(
        &self,
        address: &str,
        window: TimeWindow,
    ) -> ProviderResult<DomainSnapshot<WalletView>>;

    async fn positions(&self, address: &str) -> ProviderResult<DomainSnapshot<PositionView>>;

    async fn token(&self, symbol: &str) -> ProviderResult<DomainSnapshot<TokenView>>;
}

fn snapshot<T>(
    domain: Domain,
    payload: T,
    watermark: Option<u64>,
    coverage: DataCompleteness,
) -> DomainSnapshot<T> {
    DomainSnapshot {
        domain,
        payload,
        watermark,
        coverage,
        fetched_at: Utc::now(),
    }
}

fn millis_to_seq(time: i64) -> u64 {
    u64::try_from(time).unwrap_or_default()
}

// =============================================================================
// Core
// =============================================================================

pub struct CoreFetcher {
    provider: Arc<dyn CoreProvider>,
}

impl CoreFetcher {
    pub fn new(provider: Arc<dyn CoreProvider>) -> Self {
        Self { provider }
    }
}

fn core_position_entry(position: &CorePosition) -> PositionEntry {
    let size = position.size.abs();
    let mark_price = if size.is_zero() {
        None
    } else {
        Some(position.position_value_usd / size)
    };
    PositionEntry {
        domain: Domain::Core,
        key: qualified_key(Domain::Core, &position.coin),
        instrument: position.coin.clone(),
        side: if position.size.is_sign_negative() {
            PositionSide::Short
        } else {
            PositionSide::Long
        },
        size,
        entry_price: position.entry_price,
        mark_price,
        notional_usd: position.position_value_usd,
        unrealized_pnl_usd: position.unrealized_pnl_usd,
    }
}

fn core_positions(state: Option<&CoreAccountState>) -> Vec<PositionEntry> {
    state
        .map(|s| {
            s.positions
                .iter()
                .filter(|p| !p.size.is_zero())
                .map(core_position_entry)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl DomainFetcher for CoreFetcher {
    fn domain(&self) -> Domain {
        Domain::Core
    }

    fn coverage(&self, kind: ViewKind) -> DataCompleteness {
        coverage(Domain::Core, kind)
    }

    async fn wallet(
        &self,
        address: &str,
        window: TimeWindow,
    ) -> ProviderResult<DomainSnapshot<WalletView>> {
        let range = window.range_ending(Utc::now());
        let (state, fills, funding) = tokio::try_join!(
            self.provider.clearinghouse_state(address),
            self.provider.fills(address, range),
            self.provider.funding(address, range),
        )?;

        let open_positions = core_positions(state.as_ref());
        let view = WalletView {
            address: address.to_string(),
            account_value_usd: state
                .as_ref()
                .map(|s| s.account_value_usd)
                .unwrap_or_default(),
            total_volume_usd: fills.iter().map(|f| f.notional_usd()).sum(),
            realized_pnl_usd: fills.iter().map(|f| f.closed_pnl_usd).sum(),
            unrealized_pnl_usd: open_positions.iter().map(|p| p.unrealized_pnl_usd).sum(),
            net_funding_usd: funding.iter().map(|f| f.usdc).sum(),
            fees_paid_usd: fills.iter().map(|f| f.fee_usd).sum(),
            trade_count: fills.len() as u64,
            open_positions,
        };

        let watermark = state
            .as_ref()
            .map(|s| s.sequence)
            .into_iter()
            .chain(fills.iter().map(|f| millis_to_seq(f.time)))
            .chain(funding.iter().map(|f| millis_to_seq(f.time)))
            .max();

        tracing::debug!(
            address = %address,
            fills = %fills.len(),
            funding_events = %funding.len(),
            watermark = ?watermark,
            "Fetched Core wallet data"
        );

        Ok(snapshot(
            Domain::Core,
            view,
            watermark,
            self.coverage(ViewKind::Wallet),
        ))
    }

    async fn positions(&self, address: &str) -> ProviderResult<DomainSnapshot<PositionView>> {
        let state = self.provider.clearinghouse_state(address).await?;
        let mut view = PositionView::empty(address);
        view.positions = core_positions(state.as_ref());
        view.finalize();

        Ok(snapshot(
            Domain::Core,
            view,
            state.map(|s| s.sequence),
            self.coverage(ViewKind::Positions),
        ))
    }

    async fn token(&self, symbol: &str) -> ProviderResult<DomainSnapshot<TokenView>> {
        let (market, token) = tokio::try_join!(
            self.provider.perp_market(symbol),
            self.provider.spot_token(symbol),
        )?;

        let mut view = TokenView::empty(symbol);
        let mut watermark: Option<u64> = None;

        if let Some(token) = &token {
            view.mark_price_usd = token.mark_price;
            view.volume_24h += token.day_base_volume;
            view.notional_volume_24h_usd += token.day_notional_volume_usd;
            view.listings.push(TokenListing {
                domain: Domain::Core,
                key: qualified_key(Domain::Core, &format!("spot:{}", token.name)),
                name: token.name.clone(),
                contract: token.evm_contract.clone(),
                decimals: Some(token.sz_decimals),
                total_supply: None,
            });
            watermark = watermark.max(Some(token.sequence));
        }

        if let Some(market) = &market {
            view.mark_price_usd = view.mark_price_usd.or(Some(market.mark_price));
            view.volume_24h += market.day_base_volume;
            view.notional_volume_24h_usd += market.day_notional_volume_usd;
            view.listings.push(TokenListing {
                domain: Domain::Core,
                key: qualified_key(Domain::Core, &format!("perp:{}", market.name)),
                name: market.name.clone(),
                contract: None,
                decimals: None,
                total_supply: None,
            });
            watermark = watermark.max(Some(market.sequence));
        }

        Ok(snapshot(
            Domain::Core,
            view,
            watermark,
            self.coverage(ViewKind::Token),
        ))
    }
}

// =============================================================================
// EVM
// =============================================================================

pub struct EvmFetcher {
    provider: Arc<dyn EvmProvider>,
}

impl EvmFetcher {
    pub fn new(provider: Arc<dyn EvmProvider>) -> Self {
        Self { provider }
    }
}

fn balance_entry(balance: &EvmTokenBalance) -> PositionEntry {
    PositionEntry {
        domain: Domain::Evm,
        key: qualified_key(Domain::Evm, &balance.contract),
        instrument: balance.symbol.clone(),
        side: PositionSide::Long,
        size: balance.amount,
        entry_price: None,
        mark_price: if balance.amount.is_zero() {
            None
        } else {
            Some(balance.usd_value / balance.amount)
        },
        notional_usd: balance.usd_value,
        unrealized_pnl_usd: Decimal::ZERO,
    }
}

fn balance_entries(balances: &[EvmTokenBalance]) -> Vec<PositionEntry> {
    balances
        .iter()
        .filter(|b| !b.amount.is_zero())
        .map(balance_entry)
        .collect()
}

#[async_trait]
impl DomainFetcher for EvmFetcher {
    fn domain(&self) -> Domain {
        Domain::Evm
    }

    fn coverage(&self, kind: ViewKind) -> DataCompleteness {
        coverage(Domain::Evm, kind)
    }

    async fn wallet(
        &self,
        address: &str,
        window: TimeWindow,
    ) -> ProviderResult<DomainSnapshot<WalletView>> {
        let range = window.range_ending(Utc::now());
        let (account, transfers, balances) = tokio::try_join!(
            self.provider.account(address),
            self.provider.transfers(address, range),
            self.provider.token_balances(address),
        )?;

        let open_positions = balance_entries(&balances.data);
        let view = WalletView {
            address: address.to_string(),
            account_value_usd: open_positions.iter().map(|p| p.notional_usd).sum(),
            total_volume_usd: transfers.data.iter().map(|t| t.usd_value).sum(),
            realized_pnl_usd: Decimal::ZERO,
            unrealized_pnl_usd: Decimal::ZERO,
            net_funding_usd: Decimal::ZERO,
            fees_paid_usd: Decimal::ZERO,
            trade_count: transfers.data.len() as u64,
            open_positions,
        };

        let watermark = account
            .block_number
            .max(transfers.block_number)
            .max(balances.block_number);

        tracing::debug!(
            address = %address,
            transfers = %transfers.data.len(),
            balances = %balances.data.len(),
            block = %watermark,
            "Fetched EVM wallet data"
        );

        Ok(snapshot(
            Domain::Evm,
            view,
            Some(watermark),
            self.coverage(ViewKind::Wallet),
        ))
    }

    async fn positions(&self, address: &str) -> ProviderResult<DomainSnapshot<PositionView>> {
        let balances = self.provider.token_balances(address).await?;
        let mut view = PositionView::empty(address);
        view.positions = balance_entries(&balances.data);
        view.finalize();

        Ok(snapshot(
            Domain::Evm,
            view,
            Some(balances.block_number),
            self.coverage(ViewKind::Positions),
        ))
    }

    async fn token(&self, symbol: &str) -> ProviderResult<DomainSnapshot<TokenView>> {
        let mut view = TokenView::empty(symbol);

        let Some(token) = self.provider.token_by_symbol(symbol).await? else {
            tracing::debug!(symbol = %symbol, "Token not deployed on EVM");
            return Ok(snapshot(Domain::Evm, view, None, self.coverage(ViewKind::Token)));
        };

        let range = TimeWindow::Day.range_ending(Utc::now());
        let activity = self.provider.token_activity(&token, range).await?;

        view.volume_24h = activity.data.volume;
        view.trade_count_24h = activity.data.transfer_count;
        view.holder_count = activity.data.holder_count;
        view.listings.push(TokenListing {
            domain: Domain::Evm,
            key: qualified_key(Domain::Evm, &token.address),
            name: token.symbol.clone(),
            contract: Some(token.address.clone()),
            decimals: Some(token.decimals),
            total_supply: token.total_supply,
        });

        Ok(snapshot(
            Domain::Evm,
            view,
            Some(activity.block_number),
            self.coverage(ViewKind::Token),
        ))
    }
}
