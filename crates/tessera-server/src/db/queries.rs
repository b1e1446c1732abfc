use std::time::Instant;

use async_trait::async_trait;
use clickhouse::Client;
use tessera_core::provider::{LedgerEvent, RelationalStore};
use tessera_core::{ProviderError, ProviderResult};

use super::models::LedgerEventRow;
use super::Database;

const EVENT_COLUMNS: &str = r#"
        SELECT
            id,
            dedupe_key,
            wallet,
            kind,
            coin,
            usd_value,
            event_time,
            sequence
        FROM ledger_events FINAL
"#;

fn store_error(e: clickhouse::error::Error) -> ProviderError {
    match e {
        clickhouse::error::Error::Network(err) => {
            ProviderError::Connection(format!("clickhouse: {}", err))
        }
        clickhouse::error::Error::TimedOut => ProviderError::Timeout("clickhouse query timed out".into()),
        // Rejected statements: syntax, unknown table or column
        clickhouse::error::Error::BadResponse(message) => {
            ProviderError::BadRequest(format!("clickhouse: {}", message))
        }
        other => ProviderError::Decode(format!("clickhouse: {}", other)),
    }
}

async fn fetch_event(
    client: &Client,
    column: &'static str,
    value: &str,
) -> ProviderResult<Option<LedgerEvent>> {
    let start = Instant::now();
    tracing::debug!(column = %column, value = %value, query = "fetch_event", "Executing database query");

    let query = format!("{} WHERE {} = ? ORDER BY sequence DESC LIMIT 1", EVENT_COLUMNS, column);
    let rows: Vec<LedgerEventRow> = client
        .query(&query)
        .bind(value)
        .fetch_all()
        .await
        .map_err(store_error)?;

    let found = !rows.is_empty();
    tracing::debug!(
        column = %column,
        value = %value,
        query = "fetch_event",
        duration_ms = %start.elapsed().as_millis(),
        found = %found,
        "Database query completed"
    );

    rows.into_iter().next().map(LedgerEvent::try_from).transpose()
}

pub async fn event_by_id(client: &Client, id: &str) -> ProviderResult<Option<LedgerEvent>> {
    fetch_event(client, "id", id).await
}

/// Events are keyed by the lowercased transaction hash they settled in.
pub async fn event_by_dedupe_key(client: &Client, key: &str) -> ProviderResult<Option<LedgerEvent>> {
    fetch_event(client, "dedupe_key", &key.to_lowercase()).await
}

#[async_trait]
impl RelationalStore for Database {
    async fn event_by_id(&self, id: &str) -> ProviderResult<Option<LedgerEvent>> {
        event_by_id(self.client(), id).await
    }

    async fn event_by_dedupe_key(&self, key: &str) -> ProviderResult<Option<LedgerEvent>> {
        event_by_dedupe_key(self.client(), key).await
    }
}
