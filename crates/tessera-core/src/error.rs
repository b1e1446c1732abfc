//! Error types for Tessera Core

use thiserror::Error;

use crate::models::Domain;

/// Failure of a single call to one ledger's data provider.
///
/// Absence of an entity is not an error: providers return `Ok(None)` for
/// that. These variants describe why a call could not be answered at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Upstream unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the retry policy may attempt the call again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::Unavailable { .. }
                | ProviderError::Connection(_)
        )
    }

    /// Map an HTTP status code into the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::Unauthorized(message),
            404 => ProviderError::NotFound(message),
            408 | 429 => ProviderError::Timeout(message),
            500..=599 => ProviderError::Unavailable { status, message },
            _ => ProviderError::BadRequest(message),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One domain's contribution to a total failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainFailure {
    pub domain: Domain,
    pub error: ProviderError,
}

impl std::fmt::Display for DomainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.domain, self.error)
    }
}

/// Errors surfaced to callers of the resolver and aggregator.
///
/// Not-found and partial failure are represented inside successful results;
/// only these conditions propagate.
#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("All requested domains failed during {operation}: {}", join_failures(.failures))]
    TotalFailure {
        operation: &'static str,
        failures: Vec<DomainFailure>,
    },
}

fn join_failures(failures: &[DomainFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type TesseraResult<T> = Result<T, TesseraError>;
