use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use tessera_core::provider::{
    CoreAccountState, CoreBlock, CoreFill, CoreFunding, CoreMarket, CorePosition, CoreProvider,
    CoreToken, FillSide,
};
use tessera_core::{ProviderError, ProviderResult, TimeRange};

use super::{parse_decimal, read_json, transport_error};
use crate::config::CoreApiConfig;

const SOURCE: &str = "core-info";

// ============================================================================
// Wire types for the /info endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseStateWire {
    margin_summary: MarginSummaryWire,
    withdrawable: String,
    #[serde(default)]
    asset_positions: Vec<AssetPositionWire>,
    time: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummaryWire {
    account_value: String,
    total_margin_used: String,
}

#[derive(Debug, Deserialize)]
struct AssetPositionWire {
    position: PositionWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionWire {
    coin: String,
    szi: String,
    entry_px: Option<String>,
    position_value: String,
    unrealized_pnl: String,
    leverage: Option<LeverageWire>,
}

#[derive(Debug, Deserialize)]
struct LeverageWire {
    value: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillWire {
    coin: String,
    px: String,
    sz: String,
    /// "B" for buys, "A" for sells
    side: String,
    time: i64,
    closed_pnl: String,
    hash: String,
    tid: u64,
    fee: String,
}

#[derive(Debug, Deserialize)]
struct FundingWire {
    time: i64,
    delta: FundingDeltaWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingDeltaWire {
    coin: String,
    usdc: String,
    funding_rate: String,
}

#[derive(Debug, Deserialize)]
struct PerpMetaWire {
    universe: Vec<PerpAssetWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerpAssetWire {
    name: String,
    max_leverage: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerpCtxWire {
    mark_px: String,
    day_ntl_vlm: String,
    day_base_vlm: String,
    open_interest: String,
    funding: String,
}

#[derive(Debug, Deserialize)]
struct SpotMetaWire {
    tokens: Vec<SpotTokenWire>,
    universe: Vec<SpotPairWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotTokenWire {
    name: String,
    sz_decimals: u8,
    index: u32,
    token_id: String,
    #[serde(default)]
    evm_contract: Option<EvmContractWire>,
}

#[derive(Debug, Deserialize)]
struct EvmContractWire {
    address: String,
}

#[derive(Debug, Deserialize)]
struct SpotPairWire {
    name: String,
    tokens: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotCtxWire {
    coin: String,
    #[serde(default)]
    mark_px: Option<String>,
    day_ntl_vlm: String,
    day_base_vlm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDetailsResponse {
    block_details: Option<BlockDetailsWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDetailsWire {
    height: u64,
    block_time: i64,
    hash: String,
    proposer: String,
    num_txs: u32,
}

// ============================================================================
// Conversions
// ============================================================================

/// `None` for an address that has never held anything on the ledger.
fn account_from_wire(address: &str, wire: ClearinghouseStateWire) -> ProviderResult<Option<CoreAccountState>> {
    let account_value_usd = parse_decimal(SOURCE, &wire.margin_summary.account_value)?;
    let withdrawable_usd = parse_decimal(SOURCE, &wire.withdrawable)?;
    if wire.asset_positions.is_empty() && account_value_usd.is_zero() && withdrawable_usd.is_zero() {
        return Ok(None);
    }

    let positions = wire
        .asset_positions
        .into_iter()
        .map(|p| -> ProviderResult<CorePosition> {
            let p = p.position;
            Ok(CorePosition {
                size: parse_decimal(SOURCE, &p.szi)?,
                entry_price: p
                    .entry_px
                    .as_deref()
                    .map(|px| parse_decimal(SOURCE, px))
                    .transpose()?,
                position_value_usd: parse_decimal(SOURCE, &p.position_value)?,
                unrealized_pnl_usd: parse_decimal(SOURCE, &p.unrealized_pnl)?,
                leverage: p.leverage.map(|l| l.value.into()),
                coin: p.coin,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(Some(CoreAccountState {
        address: address.to_string(),
        account_value_usd,
        total_margin_used_usd: parse_decimal(SOURCE, &wire.margin_summary.total_margin_used)?,
        withdrawable_usd,
        positions,
        sequence: wire.time,
    }))
}

fn fill_from_wire(wire: FillWire) -> ProviderResult<CoreFill> {
    let side = match wire.side.as_str() {
        "B" => FillSide::Buy,
        "A" => FillSide::Sell,
        other => {
            return Err(ProviderError::Decode(format!("{} fill side {:?}", SOURCE, other)));
        }
    };
    Ok(CoreFill {
        price: parse_decimal(SOURCE, &wire.px)?,
        size: parse_decimal(SOURCE, &wire.sz)?,
        closed_pnl_usd: parse_decimal(SOURCE, &wire.closed_pnl)?,
        fee_usd: parse_decimal(SOURCE, &wire.fee)?,
        coin: wire.coin,
        side,
        hash: wire.hash,
        tid: wire.tid,
        time: wire.time,
    })
}

fn funding_from_wire(wire: FundingWire) -> ProviderResult<CoreFunding> {
    Ok(CoreFunding {
        usdc: parse_decimal(SOURCE, &wire.delta.usdc)?,
        funding_rate: parse_decimal(SOURCE, &wire.delta.funding_rate)?,
        coin: wire.delta.coin,
        time: wire.time,
    })
}

/// Exact name first, then case-insensitive.
fn find_by_name<'a, T>(items: &'a [T], name: &str, key: impl Fn(&T) -> &str) -> Option<(usize, &'a T)> {
    items
        .iter()
        .enumerate()
        .find(|(_, item)| key(item) == name)
        .or_else(|| {
            items
                .iter()
                .enumerate()
                .find(|(_, item)| key(item).eq_ignore_ascii_case(name))
        })
}

fn market_from_wire(
    name: &str,
    meta: PerpMetaWire,
    ctxs: Vec<PerpCtxWire>,
    sequence: u64,
) -> ProviderResult<Option<CoreMarket>> {
    let Some((index, asset)) = find_by_name(&meta.universe, name, |a| &a.name) else {
        return Ok(None);
    };
    let ctx = ctxs.get(index).ok_or_else(|| {
        ProviderError::Decode(format!("{} has no asset context for {}", SOURCE, asset.name))
    })?;
    Ok(Some(CoreMarket {
        name: asset.name.clone(),
        max_leverage: asset.max_leverage,
        mark_price: parse_decimal(SOURCE, &ctx.mark_px)?,
        day_notional_volume_usd: parse_decimal(SOURCE, &ctx.day_ntl_vlm)?,
        day_base_volume: parse_decimal(SOURCE, &ctx.day_base_vlm)?,
        open_interest: parse_decimal(SOURCE, &ctx.open_interest)?,
        funding_rate: parse_decimal(SOURCE, &ctx.funding)?,
        sequence,
    }))
}

/// A token's market statistics come from its pair against the quote token.
fn token_from_wire(
    name: &str,
    meta: SpotMetaWire,
    ctxs: Vec<SpotCtxWire>,
    sequence: u64,
) -> ProviderResult<Option<CoreToken>> {
    let Some((_, token)) = find_by_name(&meta.tokens, name, |t| &t.name) else {
        return Ok(None);
    };

    let ctx = meta
        .universe
        .iter()
        .find(|pair| pair.tokens.first() == Some(&token.index))
        .and_then(|pair| ctxs.iter().find(|ctx| ctx.coin == pair.name));

    let (mark_price, day_base_volume, day_notional_volume_usd) = match ctx {
        Some(ctx) => (
            ctx.mark_px
                .as_deref()
                .map(|px| parse_decimal(SOURCE, px))
                .transpose()?,
            parse_decimal(SOURCE, &ctx.day_base_vlm)?,
            parse_decimal(SOURCE, &ctx.day_ntl_vlm)?,
        ),
        None => (None, Default::default(), Default::default()),
    };

    Ok(Some(CoreToken {
        name: token.name.clone(),
        token_id: token.token_id.clone(),
        index: token.index,
        sz_decimals: token.sz_decimals,
        evm_contract: token.evm_contract.as_ref().map(|c| c.address.to_lowercase()),
        mark_price,
        day_base_volume,
        day_notional_volume_usd,
        sequence,
    }))
}

// ============================================================================
// Client
// ============================================================================

/// Client for the Core ledger's public info API.
#[derive(Clone)]
pub struct CoreInfoClient {
    client: Client,
    info_url: String,
    explorer_url: String,
}

impl CoreInfoClient {
    pub fn new(config: &CoreApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        tracing::debug!(info_url = %config.info_url, "Creating Core info client");

        Ok(Self {
            client,
            info_url: config.info_url.clone(),
            explorer_url: config.explorer_url.clone(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: Value) -> ProviderResult<T> {
        let start = Instant::now();
        let request_type = body["type"].as_str().unwrap_or("unknown").to_string();
        tracing::debug!(request_type = %request_type, "Querying Core info API");

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SOURCE, e))?;
        let parsed = read_json(SOURCE, response).await?;

        tracing::debug!(
            request_type = %request_type,
            duration_ms = %start.elapsed().as_millis(),
            "Core info request completed"
        );
        Ok(parsed)
    }

    async fn info<T: DeserializeOwned>(&self, body: Value) -> ProviderResult<T> {
        self.post(&self.info_url, body).await
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

#[async_trait]
impl CoreProvider for CoreInfoClient {
    async fn clearinghouse_state(&self, address: &str) -> ProviderResult<Option<CoreAccountState>> {
        let wire: ClearinghouseStateWire = self
            .info(json!({ "type": "clearinghouseState", "user": address }))
            .await?;
        account_from_wire(address, wire)
    }

    async fn block(&self, height: u64) -> ProviderResult<Option<CoreBlock>> {
        let result: ProviderResult<BlockDetailsResponse> = self
            .post(&self.explorer_url, json!({ "type": "blockDetails", "height": height }))
            .await;
        let details = match result {
            Ok(response) => response.block_details,
            Err(ProviderError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(details.map(|b| CoreBlock {
            height: b.height,
            hash: b.hash.to_lowercase(),
            time: b.block_time,
            transaction_count: b.num_txs,
            proposer: b.proposer,
        }))
    }

    async fn perp_market(&self, name: &str) -> ProviderResult<Option<CoreMarket>> {
        let (meta, ctxs): (PerpMetaWire, Vec<PerpCtxWire>) =
            self.info(json!({ "type": "metaAndAssetCtxs" })).await?;
        market_from_wire(name, meta, ctxs, now_millis())
    }

    async fn spot_token(&self, name: &str) -> ProviderResult<Option<CoreToken>> {
        let (meta, ctxs): (SpotMetaWire, Vec<SpotCtxWire>) =
            self.info(json!({ "type": "spotMetaAndAssetCtxs" })).await?;
        token_from_wire(name, meta, ctxs, now_millis())
    }

    async fn fills(&self, address: &str, range: TimeRange) -> ProviderResult<Vec<CoreFill>> {
        let wire: Vec<FillWire> = self
            .info(json!({
                "type": "userFillsByTime",
                "user": address,
                "startTime": range.start.timestamp_millis(),
                "endTime": range.end.timestamp_millis(),
            }))
            .await?;
        wire.into_iter().map(fill_from_wire).collect()
    }

    async fn funding(&self, address: &str, range: TimeRange) -> ProviderResult<Vec<CoreFunding>> {
        let wire: Vec<FundingWire> = self
            .info(json!({
                "type": "userFunding",
                "user": address,
                "startTime": range.start.timestamp_millis(),
                "endTime": range.end.timestamp_millis(),
            }))
            .await?;
        wire.into_iter().map(funding_from_wire).collect()
    }
}
