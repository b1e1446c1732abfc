use std::str::FromStr;

use clickhouse::Row;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tessera_core::provider::LedgerEvent;
use tessera_core::ProviderError;

/// Decimal values are stored as strings for precise representation in ClickHouse
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct LedgerEventRow {
    pub id: String,
    pub dedupe_key: String,
    pub wallet: String,
    pub kind: String,
    pub coin: String,
    pub usd_value: String,
    pub event_time: i64,
    pub sequence: u64,
}

impl TryFrom<LedgerEventRow> for LedgerEvent {
    type Error = ProviderError;

    fn try_from(row: LedgerEventRow) -> Result<Self, Self::Error> {
        let usd_value = Decimal::from_str(&row.usd_value).map_err(|e| {
            ProviderError::Decode(format!("ledger_events.usd_value {:?}: {}", row.usd_value, e))
        })?;

        Ok(LedgerEvent {
            id: row.id,
            dedupe_key: row.dedupe_key,
            wallet: row.wallet.to_lowercase(),
            kind: row.kind,
            coin: row.coin,
            usd_value,
            time: row.event_time,
            sequence: row.sequence,
        })
    }
}
