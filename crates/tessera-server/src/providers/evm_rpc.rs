use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tessera_core::provider::{
    EvmAccount, EvmBlock, EvmProvider, EvmToken, EvmTokenActivity, EvmTokenBalance, EvmTransaction,
    EvmTransfer, Observed,
};
use tessera_core::{ProviderError, ProviderResult, TimeRange};

use super::{read_json, transport_error};
use crate::config::{EvmRpcConfig, TokenConfig};

const SOURCE: &str = "evm-rpc";
const NATIVE_DECIMALS: u8 = 18;

/// keccak256("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const BALANCE_OF_SELECTOR: &str = "70a08231";
const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";

// ============================================================================
// JSON-RPC envelope
// ============================================================================

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

fn rpc_error(method: &str, error: RpcErrorBody) -> ProviderError {
    let message = format!("{} {}: {} ({})", SOURCE, method, error.message, error.code);
    match error.code {
        // Malformed request, unknown method, bad params
        -32600 | -32601 | -32602 => ProviderError::BadRequest(message),
        _ => ProviderError::Unavailable {
            status: 502,
            message,
        },
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionWire {
    hash: String,
    block_number: Option<String>,
    from: String,
    to: Option<String>,
    value: String,
    nonce: String,
}

#[derive(Debug, Deserialize)]
struct BlockWire {
    number: String,
    hash: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogWire {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    transaction_hash: String,
    log_index: String,
}

// ============================================================================
// Hex helpers
// ============================================================================

fn decode_err(what: &str, value: &str) -> ProviderError {
    ProviderError::Decode(format!("{} {}: {:?}", SOURCE, what, value))
}

fn strip_hex(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

fn hex_u64(value: &str) -> ProviderResult<u64> {
    let digits = strip_hex(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|_| decode_err("quantity", value))
}

/// 256-bit words are accepted as long as the value fits in 128 bits.
fn hex_u128(value: &str) -> ProviderResult<u128> {
    let digits = strip_hex(value).trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|_| decode_err("uint", value))
}

/// Scale a raw integer amount by the token's decimals.
fn hex_amount(value: &str, decimals: u8) -> ProviderResult<Decimal> {
    let raw = i128::try_from(hex_u128(value)?).map_err(|_| decode_err("amount", value))?;
    Decimal::try_from_i128_with_scale(raw, u32::from(decimals))
        .map(|d| d.normalize())
        .map_err(|_| decode_err("amount", value))
}

fn address_topic(address: &str) -> String {
    format!("0x{:0>64}", strip_hex(address).to_lowercase())
}

fn topic_address(topic: &str) -> String {
    let digits = strip_hex(topic);
    let tail = digits.get(digits.len().saturating_sub(40)..).unwrap_or(digits);
    format!("0x{}", tail).to_lowercase()
}

fn to_hex(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Blocks spanned by `range`, at most `max_blocks`.
fn block_span(range: &TimeRange, block_time_ms: u64, max_blocks: u64) -> u64 {
    let span_ms = u64::try_from((range.end - range.start).num_milliseconds()).unwrap_or_default();
    (span_ms / block_time_ms.max(1)).min(max_blocks)
}

// ============================================================================
// Token registry
// ============================================================================

#[derive(Debug, Clone)]
struct RegisteredToken {
    symbol: String,
    address: String,
    decimals: u8,
    usd_price: Option<Decimal>,
}

impl From<&TokenConfig> for RegisteredToken {
    fn from(config: &TokenConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            address: config.address.to_lowercase(),
            decimals: config.decimals,
            usd_price: config.usd_price,
        }
    }
}

impl RegisteredToken {
    fn usd_value(&self, amount: Decimal) -> Decimal {
        self.usd_price.map(|p| p * amount).unwrap_or_default()
    }
}

fn transfer_from_log(log: &LogWire, token: &RegisteredToken) -> ProviderResult<Option<EvmTransfer>> {
    // ERC-721 transfers index the token id as a fourth topic
    if log.topics.len() != 3 || log.topics[0] != TRANSFER_TOPIC {
        return Ok(None);
    }
    let amount = hex_amount(&log.data, token.decimals)?;
    Ok(Some(EvmTransfer {
        symbol: token.symbol.clone(),
        contract: token.address.clone(),
        from: topic_address(&log.topics[1]),
        to: topic_address(&log.topics[2]),
        amount,
        usd_value: token.usd_value(amount),
        block_number: hex_u64(&log.block_number)?,
        tx_hash: log.transaction_hash.to_lowercase(),
        log_index: hex_u64(&log.log_index)?,
    }))
}

fn block_from_wire(wire: BlockWire) -> ProviderResult<EvmBlock> {
    Ok(EvmBlock {
        number: hex_u64(&wire.number)?,
        hash: wire.hash.to_lowercase(),
        timestamp: i64::try_from(hex_u64(&wire.timestamp)?).map_err(|_| decode_err("timestamp", &wire.timestamp))?,
        transaction_count: u32::try_from(wire.transactions.len()).unwrap_or(u32::MAX),
    })
}

fn transaction_from_wire(wire: TransactionWire) -> ProviderResult<EvmTransaction> {
    Ok(EvmTransaction {
        block_number: wire.block_number.as_deref().map(hex_u64).transpose()?,
        value: hex_amount(&wire.value, NATIVE_DECIMALS)?,
        nonce: hex_u64(&wire.nonce)?,
        hash: wire.hash.to_lowercase(),
        from: wire.from.to_lowercase(),
        to: wire.to.map(|t| t.to_lowercase()),
    })
}

// ============================================================================
// Client
// ============================================================================

/// JSON-RPC client for the EVM chain, with a configured ERC-20 registry.
#[derive(Clone)]
pub struct EvmRpcClient {
    client: Client,
    url: String,
    block_time_ms: u64,
    max_log_blocks: u64,
    tokens: Vec<RegisteredToken>,
}

impl EvmRpcClient {
    pub fn new(config: &EvmRpcConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        tracing::debug!(url = %config.url, tokens = %config.tokens.len(), "Creating EVM RPC client");

        Ok(Self {
            client,
            url: config.url.clone(),
            block_time_ms: config.block_time_ms,
            max_log_blocks: config.max_log_blocks,
            tokens: config.tokens.iter().map(RegisteredToken::from).collect(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ProviderResult<Option<T>> {
        let start = Instant::now();
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(SOURCE, e))?;
        let body: RpcResponse<T> = read_json(SOURCE, response).await?;

        tracing::debug!(
            method = %method,
            duration_ms = %start.elapsed().as_millis(),
            "EVM RPC call completed"
        );

        match body.error {
            Some(error) => Err(rpc_error(method, error)),
            None => Ok(body.result),
        }
    }

    /// A call whose result must be present.
    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> ProviderResult<T> {
        self.call(method, params)
            .await?
            .ok_or_else(|| ProviderError::Decode(format!("{} {} returned null", SOURCE, method)))
    }

    async fn head(&self) -> ProviderResult<u64> {
        let head: String = self.call_required("eth_blockNumber", json!([])).await?;
        hex_u64(&head)
    }

    fn registered_by_address(&self, address: &str) -> Option<&RegisteredToken> {
        self.tokens.iter().find(|t| t.address == address)
    }

    fn registered_by_symbol(&self, symbol: &str) -> Option<&RegisteredToken> {
        self.tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .or_else(|| self.tokens.iter().find(|t| t.symbol.eq_ignore_ascii_case(symbol)))
    }

    async fn total_supply(&self, token: &RegisteredToken) -> ProviderResult<Option<Decimal>> {
        let raw: Option<String> = self
            .call(
                "eth_call",
                json!([{ "to": token.address, "data": TOTAL_SUPPLY_SELECTOR }, "latest"]),
            )
            .await?;
        match raw.as_deref() {
            None | Some("0x") => Ok(None),
            Some(raw) => hex_amount(raw, token.decimals).map(Some),
        }
    }

    async fn evm_token(&self, token: &RegisteredToken) -> ProviderResult<EvmToken> {
        Ok(EvmToken {
            symbol: token.symbol.clone(),
            address: token.address.clone(),
            decimals: token.decimals,
            total_supply: self.total_supply(token).await?,
        })
    }

    async fn logs(&self, filter: Value) -> ProviderResult<Vec<LogWire>> {
        Ok(self.call("eth_getLogs", json!([filter])).await?.unwrap_or_default())
    }

    fn from_block(&self, head: u64, range: &TimeRange) -> u64 {
        head.saturating_sub(block_span(range, self.block_time_ms, self.max_log_blocks))
    }
}

#[async_trait]
impl EvmProvider for EvmRpcClient {
    async fn transaction(&self, hash: &str) -> ProviderResult<Option<EvmTransaction>> {
        let wire: Option<TransactionWire> = self.call("eth_getTransactionByHash", json!([hash])).await?;
        wire.map(transaction_from_wire).transpose()
    }

    async fn block_by_number(&self, number: u64) -> ProviderResult<Option<EvmBlock>> {
        let wire: Option<BlockWire> = self
            .call("eth_getBlockByNumber", json!([to_hex(number), false]))
            .await?;
        wire.map(block_from_wire).transpose()
    }

    async fn block_by_hash(&self, hash: &str) -> ProviderResult<Option<EvmBlock>> {
        let wire: Option<BlockWire> = self.call("eth_getBlockByHash", json!([hash, false])).await?;
        wire.map(block_from_wire).transpose()
    }

    async fn account(&self, address: &str) -> ProviderResult<EvmAccount> {
        let head = self.head().await?;
        let tag = to_hex(head);
        let (balance, nonce, code): (String, String, String) = tokio::try_join!(
            self.call_required("eth_getBalance", json!([address, tag])),
            self.call_required("eth_getTransactionCount", json!([address, tag])),
            self.call_required("eth_getCode", json!([address, tag])),
        )?;

        Ok(EvmAccount {
            address: address.to_string(),
            balance: hex_amount(&balance, NATIVE_DECIMALS)?,
            nonce: hex_u64(&nonce)?,
            is_contract: !strip_hex(&code).is_empty(),
            block_number: head,
        })
    }

    async fn token_by_symbol(&self, symbol: &str) -> ProviderResult<Option<EvmToken>> {
        match self.registered_by_symbol(symbol) {
            Some(token) => self.evm_token(token).await.map(Some),
            None => Ok(None),
        }
    }

    async fn token_by_address(&self, address: &str) -> ProviderResult<Option<EvmToken>> {
        match self.registered_by_address(&address.to_lowercase()) {
            Some(token) => self.evm_token(token).await.map(Some),
            None => Ok(None),
        }
    }

    async fn transfers(
        &self,
        address: &str,
        range: TimeRange,
    ) -> ProviderResult<Observed<Vec<EvmTransfer>>> {
        let head = self.head().await?;
        if self.tokens.is_empty() {
            return Ok(Observed {
                data: Vec::new(),
                block_number: head,
            });
        }

        let contracts: Vec<&str> = self.tokens.iter().map(|t| t.address.as_str()).collect();
        let from_block = to_hex(self.from_block(head, &range));
        let to_block = to_hex(head);
        let topic = address_topic(address);

        let (sent, received) = tokio::try_join!(
            self.logs(json!({
                "address": contracts,
                "fromBlock": from_block,
                "toBlock": to_block,
                "topics": [TRANSFER_TOPIC, topic],
            })),
            self.logs(json!({
                "address": contracts,
                "fromBlock": from_block,
                "toBlock": to_block,
                "topics": [TRANSFER_TOPIC, Value::Null, topic],
            })),
        )?;

        // Self-transfers show up in both queries
        let mut seen = HashSet::new();
        let mut data = Vec::new();
        for log in sent.iter().chain(received.iter()) {
            let Some(token) = self.registered_by_address(&log.address.to_lowercase()) else {
                continue;
            };
            if let Some(transfer) = transfer_from_log(log, token)? {
                if seen.insert((transfer.tx_hash.clone(), transfer.log_index)) {
                    data.push(transfer);
                }
            }
        }

        tracing::debug!(
            address = %address,
            transfers = %data.len(),
            head = %head,
            "Fetched EVM token transfers"
        );

        Ok(Observed {
            data,
            block_number: head,
        })
    }

    async fn token_balances(&self, address: &str) -> ProviderResult<Observed<Vec<EvmTokenBalance>>> {
        let head = self.head().await?;
        let tag = to_hex(head);
        let calldata = format!("0x{}{}", BALANCE_OF_SELECTOR, &address_topic(address)[2..]);

        let raw: Vec<Option<String>> = try_join_all(self.tokens.iter().map(|token| {
            self.call(
                "eth_call",
                json!([{ "to": token.address, "data": calldata }, tag]),
            )
        }))
        .await?;

        let mut data = Vec::new();
        for (token, raw) in self.tokens.iter().zip(raw) {
            let amount = match raw.as_deref() {
                None | Some("0x") => Decimal::ZERO,
                Some(raw) => hex_amount(raw, token.decimals)?,
            };
            if amount.is_zero() {
                continue;
            }
            data.push(EvmTokenBalance {
                symbol: token.symbol.clone(),
                contract: token.address.clone(),
                amount,
                usd_value: token.usd_value(amount),
            });
        }

        Ok(Observed {
            data,
            block_number: head,
        })
    }

    async fn token_activity(
        &self,
        token: &EvmToken,
        range: TimeRange,
    ) -> ProviderResult<Observed<EvmTokenActivity>> {
        let head = self.head().await?;
        let registered = self
            .registered_by_address(&token.address.to_lowercase())
            .cloned()
            .unwrap_or_else(|| RegisteredToken {
                symbol: token.symbol.clone(),
                address: token.address.to_lowercase(),
                decimals: token.decimals,
                usd_price: None,
            });

        let logs = self
            .logs(json!({
                "address": registered.address,
                "fromBlock": to_hex(self.from_block(head, &range)),
                "toBlock": to_hex(head),
                "topics": [TRANSFER_TOPIC],
            }))
            .await?;

        let transfers = logs
            .iter()
            .map(|log| transfer_from_log(log, &registered))
            .collect::<ProviderResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        let holders: HashSet<&str> = transfers.iter().map(|t| t.to.as_str()).collect();

        Ok(Observed {
            data: EvmTokenActivity {
                symbol: registered.symbol.clone(),
                contract: registered.address.clone(),
                transfer_count: transfers.len() as u64,
                volume: transfers.iter().map(|t| t.amount).sum(),
                holder_count: holders.len() as u64,
            },
            block_number: head,
        })
    }
}
