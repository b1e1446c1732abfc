use serde::{Deserialize, Serialize};
use tessera_core::{Domain, TimeWindow};

use crate::error::{AppError, AppResult};

// ============================================================================
// POST /api/v1/resolve
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub query: String,
}

// ============================================================================
// POST /api/v1/aggregate/{wallet,positions,token}
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    /// Wallet address or token symbol, depending on the view
    pub id: String,
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    /// Only read by the wallet view
    #[serde(default)]
    pub window: Option<String>,
}

impl AggregateRequest {
    /// Requested domains; both when omitted.
    pub fn parse_domains(&self) -> AppResult<Vec<Domain>> {
        match &self.domains {
            None => Ok(Domain::ALL.to_vec()),
            Some(names) => names
                .iter()
                .map(|name| name.parse::<Domain>().map_err(AppError::from))
                .collect(),
        }
    }

    pub fn parse_window(&self) -> AppResult<TimeWindow> {
        match self.window.as_deref() {
            None => Ok(TimeWindow::default()),
            Some(raw) => raw.parse::<TimeWindow>().map_err(AppError::from),
        }
    }

    pub fn domain_labels(&self) -> String {
        self.domains
            .as_ref()
            .map(|d| d.join(","))
            .unwrap_or_else(|| "all".to_string())
    }
}

// ============================================================================
// GET /health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub cache_entries: u64,
}
