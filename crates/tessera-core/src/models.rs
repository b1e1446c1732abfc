//! Resolution and view-metadata models shared by the resolver and aggregator
//!
//! These are the JSON shapes returned to callers. Entity payloads are a tagged
//! union so consumers can match exhaustively instead of probing loose maps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TesseraError;
use crate::provider::{
    CoreAccountState, CoreBlock, CoreMarket, CoreToken, EvmAccount, EvmBlock, EvmToken,
    EvmTransaction, LedgerEvent,
};

// =============================================================================
// Domains and identifiers
// =============================================================================

/// One of the two independent ledgers.
///
/// Declaration order is the tie-break priority: Core is the settlement
/// domain of record and wins equal-confidence ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Core,
    Evm,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Core, Domain::Evm];

    /// Human-readable label used in alternate context notes.
    pub fn label(&self) -> &'static str {
        match self {
            Domain::Core => "Core",
            Domain::Evm => "EVM",
        }
    }
}

impl FromStr for Domain {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "core" | "hypercore" => Ok(Domain::Core),
            "evm" | "hyperevm" => Ok(Domain::Evm),
            _ => Err(TesseraError::InvalidInput(format!("Unknown domain: {}", s))),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Core => write!(f, "core"),
            Domain::Evm => write!(f, "evm"),
        }
    }
}

/// Weak hint about which domain an identifier probably belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainHint {
    Core,
    Evm,
    Both,
}

impl DomainHint {
    pub fn domains(&self) -> Vec<Domain> {
        match self {
            DomainHint::Core => vec![Domain::Core],
            DomainHint::Evm => vec![Domain::Evm],
            DomainHint::Both => Domain::ALL.to_vec(),
        }
    }
}

/// Syntactic category of a raw identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntacticClass {
    EvmAddress,
    TxHash,
    BlockNumber,
    Unknown,
}

/// A classified, canonicalized identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identifier {
    pub raw: String,
    pub canonical: String,
    pub class: SyntacticClass,
}

// =============================================================================
// Candidates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Wallet,
    Tx,
    Block,
    Token,
    Market,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Wallet => write!(f, "wallet"),
            EntityType::Tx => write!(f, "transaction"),
            EntityType::Block => write!(f, "block"),
            EntityType::Token => write!(f, "token"),
            EntityType::Market => write!(f, "market"),
        }
    }
}

/// Domain-specific payload attached to a candidate, one schema per
/// (domain, entity type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityMetadata {
    CoreAccount(CoreAccountState),
    CoreEvent(LedgerEvent),
    CoreBlock(CoreBlock),
    CoreMarket(CoreMarket),
    CoreToken(CoreToken),
    EvmAccount(EvmAccount),
    EvmTransaction(EvmTransaction),
    EvmBlock(EvmBlock),
    EvmToken(EvmToken),
}

impl EntityMetadata {
    pub fn domain(&self) -> Domain {
        match self {
            EntityMetadata::CoreAccount(_)
            | EntityMetadata::CoreEvent(_)
            | EntityMetadata::CoreBlock(_)
            | EntityMetadata::CoreMarket(_)
            | EntityMetadata::CoreToken(_) => Domain::Core,
            EntityMetadata::EvmAccount(_)
            | EntityMetadata::EvmTransaction(_)
            | EntityMetadata::EvmBlock(_)
            | EntityMetadata::EvmToken(_) => Domain::Evm,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityMetadata::CoreAccount(_) | EntityMetadata::EvmAccount(_) => EntityType::Wallet,
            EntityMetadata::CoreEvent(_) | EntityMetadata::EvmTransaction(_) => EntityType::Tx,
            EntityMetadata::CoreBlock(_) | EntityMetadata::EvmBlock(_) => EntityType::Block,
            EntityMetadata::CoreToken(_) | EntityMetadata::EvmToken(_) => EntityType::Token,
            EntityMetadata::CoreMarket(_) => EntityType::Market,
        }
    }
}

/// One ledger's confirmed claim about an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub entity_type: EntityType,
    pub domain: Domain,
    pub canonical_id: String,
    /// In [0, 1]
    pub confidence: f64,
    pub metadata: EntityMetadata,
}

impl CandidateEntity {
    /// Build a candidate whose type and domain are derived from its metadata,
    /// so the three can never disagree.
    pub fn new(canonical_id: impl Into<String>, confidence: f64, metadata: EntityMetadata) -> Self {
        Self {
            entity_type: metadata.entity_type(),
            domain: metadata.domain(),
            canonical_id: canonical_id.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    pub candidate: CandidateEntity,
    pub context: String,
}

/// Output of the resolver for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub query: String,
    pub syntactic_class: SyntacticClass,
    pub primary: Option<CandidateEntity>,
    pub alternates: Vec<Alternate>,
    pub resolved_at: DateTime<Utc>,
    /// Domains whose probe failed for infrastructure reasons; the result may
    /// be missing their candidates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_domains: Vec<Domain>,
}

impl ResolutionResult {
    pub fn is_found(&self) -> bool {
        self.primary.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_domains.is_empty()
    }
}

// =============================================================================
// Unified view metadata
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Eventual,
    Synchronized,
    Stale,
}

/// Highest sequence / block number observed from each domain at merge time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWatermark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_block: Option<u64>,
}

impl SourceWatermark {
    pub fn get(&self, domain: Domain) -> Option<u64> {
        match domain {
            Domain::Core => self.core_seq,
            Domain::Evm => self.evm_block,
        }
    }

    /// Keep the highest value seen for the domain.
    pub fn observe(&mut self, domain: Domain, value: u64) {
        let slot = match domain {
            Domain::Core => &mut self.core_seq,
            Domain::Evm => &mut self.evm_block,
        };
        *slot = Some(slot.map_or(value, |current| current.max(value)));
    }
}

/// Which data categories a view (or a single domain snapshot) covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCompleteness {
    pub trades: bool,
    pub funding: bool,
    pub positions: bool,
}

impl DataCompleteness {
    pub const ALL: DataCompleteness = DataCompleteness {
        trades: true,
        funding: true,
        positions: true,
    };

    pub fn is_complete(&self) -> bool {
        self.trades && self.funding && self.positions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// Fetched successfully in this merge cycle
    Fresh,
    /// Fetch failed; a last-known-good snapshot was substituted
    Stale,
    /// Fetch failed and nothing was substituted
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainHealth {
    pub domain: Domain,
    pub status: DomainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMetadata {
    pub computed_at: DateTime<Utc>,
    pub source_watermark: SourceWatermark,
    pub consistency_level: ConsistencyLevel,
    /// In [0, 100]
    pub confidence_score: u8,
    pub data_completeness: DataCompleteness,
    pub domains: Vec<DomainHealth>,
}

/// Merged cross-domain view of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedView<T> {
    pub data: T,
    pub metadata: ViewMetadata,
}

impl<T> UnifiedView<T> {
    pub fn is_degraded(&self) -> bool {
        self.metadata
            .domains
            .iter()
            .any(|d| d.status != DomainStatus::Fresh)
    }
}

// =============================================================================
// Time windows
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "all")]
    All,
}

impl Default for TimeWindow {
    fn default() -> Self {
        TimeWindow::Week
    }
}

impl FromStr for TimeWindow {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "24h" | "1d" => Ok(TimeWindow::Day),
            "7d" | "1w" => Ok(TimeWindow::Week),
            "30d" | "1m" => Ok(TimeWindow::Month),
            "all" => Ok(TimeWindow::All),
            _ => Err(TesseraError::InvalidInput(format!("Invalid window: {}", s))),
        }
    }
}

impl TimeWindow {

    pub fn to_days(&self) -> Option<i64> {
        match self {
            TimeWindow::Day => Some(1),
            TimeWindow::Week => Some(7),
            TimeWindow::Month => Some(30),
            TimeWindow::All => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Day => "24h",
            TimeWindow::Week => "7d",
            TimeWindow::Month => "30d",
            TimeWindow::All => "all",
        }
    }

    /// Concrete range ending at `now`. "all" starts at the Unix epoch.
    pub fn range_ending(&self, now: DateTime<Utc>) -> TimeRange {
        let start = match self.to_days() {
            Some(days) => now - Duration::days(days),
            None => DateTime::<Utc>::default(),
        };
        TimeRange { start, end: now }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
