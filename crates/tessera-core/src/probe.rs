//! Domain probes: "does this identifier exist on my ledger, and as what?"
//!
//! A probe returns `Ok(None)` for absence and only errors when its provider
//! could not answer. Each implementation picks its sub-lookups from the
//! syntactic class of the identifier.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::models::{CandidateEntity, Domain, EntityMetadata, SyntacticClass};
use crate::provider::{CoreProvider, EvmProvider, RelationalStore};

/// Exact lookups by hash, height or primary key
const EXACT_MATCH: f64 = 1.0;
/// Relational match through the dedupe key rather than the primary key
const DEDUPE_KEY_MATCH: f64 = 0.9;
const ACTIVE_WALLET: f64 = 0.9;
const DORMANT_WALLET: f64 = 0.7;
const TOKEN_CONTRACT: f64 = 0.95;
const PENDING_TX: f64 = 0.8;
const SYMBOL_EXACT: f64 = 0.8;
const SYMBOL_FUZZY: f64 = 0.6;

fn symbol_confidence(query: &str, found: &str) -> f64 {
    if query == found {
        SYMBOL_EXACT
    } else {
        SYMBOL_FUZZY
    }
}

#[async_trait]
pub trait DomainProbe: Send + Sync {
    fn domain(&self) -> Domain;

    async fn probe(
        &self,
        canonical_id: &str,
        class: SyntacticClass,
    ) -> ProviderResult<Option<CandidateEntity>>;
}

// =============================================================================
// Core
// =============================================================================

pub struct CoreProbe {
    provider: Arc<dyn CoreProvider>,
    store: Arc<dyn RelationalStore>,
}

impl CoreProbe {
    pub fn new(provider: Arc<dyn CoreProvider>, store: Arc<dyn RelationalStore>) -> Self {
        Self { provider, store }
    }

    async fn probe_wallet(&self, address: &str) -> ProviderResult<Option<CandidateEntity>> {
        let Some(state) = self.provider.clearinghouse_state(address).await? else {
            return Ok(None);
        };
        let confidence = if state.positions.is_empty() && state.account_value_usd.is_zero() {
            DORMANT_WALLET
        } else {
            ACTIVE_WALLET
        };
        Ok(Some(CandidateEntity::new(
            address,
            confidence,
            EntityMetadata::CoreAccount(state),
        )))
    }

    async fn probe_event(&self, hash: &str) -> ProviderResult<Option<CandidateEntity>> {
        if let Some(event) = self.store.event_by_id(hash).await? {
            return Ok(Some(CandidateEntity::new(
                hash,
                EXACT_MATCH,
                EntityMetadata::CoreEvent(event),
            )));
        }
        tracing::debug!(hash = %hash, "No event by primary key, trying dedupe key");
        if let Some(event) = self.store.event_by_dedupe_key(hash).await? {
            return Ok(Some(CandidateEntity::new(
                hash,
                DEDUPE_KEY_MATCH,
                EntityMetadata::CoreEvent(event),
            )));
        }
        Ok(None)
    }

    async fn probe_block(&self, height: &str) -> ProviderResult<Option<CandidateEntity>> {
        let Ok(height) = height.parse::<u64>() else {
            return Ok(None);
        };
        Ok(self.provider.block(height).await?.map(|block| {
            CandidateEntity::new(height.to_string(), EXACT_MATCH, EntityMetadata::CoreBlock(block))
        }))
    }

    async fn probe_symbol(&self, symbol: &str) -> ProviderResult<Option<CandidateEntity>> {
        if let Some(market) = self.provider.perp_market(symbol).await? {
            let confidence = symbol_confidence(symbol, &market.name);
            return Ok(Some(CandidateEntity::new(
                market.name.clone(),
                confidence,
                EntityMetadata::CoreMarket(market),
            )));
        }
        if let Some(token) = self.provider.spot_token(symbol).await? {
            let confidence = symbol_confidence(symbol, &token.name);
            return Ok(Some(CandidateEntity::new(
                token.name.clone(),
                confidence,
                EntityMetadata::CoreToken(token),
            )));
        }
        Ok(None)
    }
}

#[async_trait]
impl DomainProbe for CoreProbe {
    fn domain(&self) -> Domain {
        Domain::Core
    }

    async fn probe(
        &self,
        canonical_id: &str,
        class: SyntacticClass,
    ) -> ProviderResult<Option<CandidateEntity>> {
        match class {
            SyntacticClass::EvmAddress => self.probe_wallet(canonical_id).await,
            SyntacticClass::TxHash => self.probe_event(canonical_id).await,
            SyntacticClass::BlockNumber => self.probe_block(canonical_id).await,
            SyntacticClass::Unknown => self.probe_symbol(canonical_id).await,
        }
    }
}

// =============================================================================
// EVM
// =============================================================================

pub struct EvmProbe {
    provider: Arc<dyn EvmProvider>,
}

impl EvmProbe {
    pub fn new(provider: Arc<dyn EvmProvider>) -> Self {
        Self { provider }
    }

    async fn probe_address(&self, address: &str) -> ProviderResult<Option<CandidateEntity>> {
        let account = self.provider.account(address).await?;
        if !account.has_activity() {
            return Ok(None);
        }

        if account.is_contract {
            if let Some(token) = self.provider.token_by_address(address).await? {
                return Ok(Some(CandidateEntity::new(
                    address,
                    TOKEN_CONTRACT,
                    EntityMetadata::EvmToken(token),
                )));
            }
        }

        let confidence = if account.nonce > 0 || account.is_contract {
            ACTIVE_WALLET
        } else {
            DORMANT_WALLET
        };
        Ok(Some(CandidateEntity::new(
            address,
            confidence,
            EntityMetadata::EvmAccount(account),
        )))
    }

    async fn probe_hash(&self, hash: &str) -> ProviderResult<Option<CandidateEntity>> {
        if let Some(tx) = self.provider.transaction(hash).await? {
            let confidence = if tx.block_number.is_some() {
                EXACT_MATCH
            } else {
                PENDING_TX
            };
            return Ok(Some(CandidateEntity::new(
                hash,
                confidence,
                EntityMetadata::EvmTransaction(tx),
            )));
        }
        Ok(self.provider.block_by_hash(hash).await?.map(|block| {
            CandidateEntity::new(hash, EXACT_MATCH, EntityMetadata::EvmBlock(block))
        }))
    }

    async fn probe_block(&self, number: &str) -> ProviderResult<Option<CandidateEntity>> {
        let Ok(number) = number.parse::<u64>() else {
            return Ok(None);
        };
        Ok(self.provider.block_by_number(number).await?.map(|block| {
            CandidateEntity::new(number.to_string(), EXACT_MATCH, EntityMetadata::EvmBlock(block))
        }))
    }

    async fn probe_symbol(&self, symbol: &str) -> ProviderResult<Option<CandidateEntity>> {
        Ok(self.provider.token_by_symbol(symbol).await?.map(|token| {
            let confidence = symbol_confidence(symbol, &token.symbol);
            CandidateEntity::new(token.address.clone(), confidence, EntityMetadata::EvmToken(token))
        }))
    }
}

#[async_trait]
impl DomainProbe for EvmProbe {
    fn domain(&self) -> Domain {
        Domain::Evm
    }

    async fn probe(
        &self,
        canonical_id: &str,
        class: SyntacticClass,
    ) -> ProviderResult<Option<CandidateEntity>> {
        match class {
            SyntacticClass::EvmAddress => self.probe_address(canonical_id).await,
            SyntacticClass::TxHash => self.probe_hash(canonical_id).await,
            SyntacticClass::BlockNumber => self.probe_block(canonical_id).await,
            SyntacticClass::Unknown => self.probe_symbol(canonical_id).await,
        }
    }
}
