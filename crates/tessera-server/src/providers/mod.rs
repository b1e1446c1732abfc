//! HTTP adapters implementing the core provider contracts

pub mod core_info;
pub mod evm_rpc;

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tessera_core::ProviderError;

pub use core_info::CoreInfoClient;
pub use evm_rpc::EvmRpcClient;

/// Map a transport failure into the provider error taxonomy.
pub fn transport_error(source: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(format!("{} request timed out", source))
    } else if e.is_connect() || e.is_request() {
        ProviderError::Connection(format!("{} request failed: {}", source, e))
    } else if e.is_decode() {
        ProviderError::Decode(format!("{} response: {}", source, e))
    } else if let Some(status) = e.status() {
        ProviderError::from_status(status.as_u16(), format!("{}: {}", source, e))
    } else {
        ProviderError::Connection(format!("{}: {}", source, e))
    }
}

/// Read a response body, turning non-success statuses into provider errors.
pub async fn read_json<T: DeserializeOwned>(
    source: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(source = %source, status = %status, body = %body, "Upstream API error");
        let excerpt: String = body.chars().take(200).collect();
        return Err(ProviderError::from_status(
            status.as_u16(),
            format!("{} returned {}: {}", source, status, excerpt),
        ));
    }
    response.json().await.map_err(|e| {
        tracing::error!(source = %source, error = %e, "Failed to parse upstream response");
        ProviderError::Decode(format!("{} response: {}", source, e))
    })
}

/// Decimal from the string-encoded numbers the Core API uses.
pub fn parse_decimal(source: &str, value: &str) -> Result<Decimal, ProviderError> {
    Decimal::from_str(value)
        .map_err(|e| ProviderError::Decode(format!("{} field {:?}: {}", source, value, e)))
}
