//! Entity resolution across both ledgers
//!
//! classify -> probe every candidate domain concurrently -> rank.
//! A single domain's infrastructure failure degrades the result instead of
//! failing it; only when every probed domain fails does resolution error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;

use crate::classifier::{guess_domain, identify};
use crate::error::{DomainFailure, ProviderError, TesseraError, TesseraResult};
use crate::models::{Alternate, CandidateEntity, Domain, Identifier, ResolutionResult};
use crate::probe::DomainProbe;
use crate::retry::{with_deadline, with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Deadline for one probe attempt
    pub probe_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// What one domain said about the identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Candidate(CandidateEntity),
    Absent,
    /// Neither confirmed present nor absent
    Unknown(ProviderError),
}

pub struct EntityResolver {
    probes: Vec<Arc<dyn DomainProbe>>,
    settings: ResolverSettings,
}

impl EntityResolver {
    pub fn new(
        core: Arc<dyn DomainProbe>,
        evm: Arc<dyn DomainProbe>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            probes: vec![core, evm],
            settings,
        }
    }

    pub async fn resolve(&self, input: &str) -> TesseraResult<ResolutionResult> {
        let start = Instant::now();
        if input.trim().is_empty() {
            return Err(TesseraError::InvalidInput("Query cannot be empty".into()));
        }

        let identifier = identify(input);
        let domains = guess_domain(identifier.class).domains();
        tracing::debug!(
            query = %input,
            class = ?identifier.class,
            canonical = %identifier.canonical,
            "Classified identifier"
        );

        let branches = self
            .probes
            .iter()
            .filter(|probe| domains.contains(&probe.domain()))
            .map(|probe| self.run_probe(probe.as_ref(), &identifier));
        let outcomes = join_all(branches).await;

        let failures: Vec<DomainFailure> = outcomes
            .iter()
            .filter_map(|(domain, outcome)| match outcome {
                ProbeOutcome::Unknown(error) => Some(DomainFailure {
                    domain: *domain,
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect();

        if !outcomes.is_empty() && failures.len() == outcomes.len() {
            tracing::error!(query = %input, "Every domain probe failed");
            return Err(TesseraError::TotalFailure {
                operation: "resolve",
                failures,
            });
        }

        let degraded_domains: Vec<Domain> = failures.iter().map(|f| f.domain).collect();
        for failure in &failures {
            tracing::warn!(
                query = %input,
                domain = %failure.domain,
                error = %failure.error,
                "Probe failed; resolution may be incomplete"
            );
        }

        let (primary, alternates) = rank(outcomes);

        tracing::info!(
            query = %input,
            found = %primary.is_some(),
            primary_domain = ?primary.as_ref().map(|c| c.domain),
            alternates = %alternates.len(),
            degraded = %!degraded_domains.is_empty(),
            duration_ms = %start.elapsed().as_millis(),
            "Resolution completed"
        );

        Ok(ResolutionResult {
            query: input.to_string(),
            syntactic_class: identifier.class,
            primary,
            alternates,
            resolved_at: Utc::now(),
            degraded_domains,
        })
    }

    async fn run_probe(
        &self,
        probe: &dyn DomainProbe,
        identifier: &Identifier,
    ) -> (Domain, ProbeOutcome) {
        let domain = probe.domain();
        let label = format!("probe:{}", domain);
        let settings = &self.settings;

        let result = with_retry(&settings.retry, &label, || {
            with_deadline(
                settings.probe_timeout,
                &label,
                probe.probe(&identifier.canonical, identifier.class),
            )
        })
        .await;

        let outcome = match result {
            Ok(Some(candidate)) if candidate.domain == domain => ProbeOutcome::Candidate(candidate),
            Ok(Some(candidate)) => {
                tracing::error!(
                    probe = %domain,
                    claimed = %candidate.domain,
                    "Probe returned a candidate for another domain; discarding"
                );
                ProbeOutcome::Absent
            }
            Ok(None) => ProbeOutcome::Absent,
            // A "not found" from a provider is absence, not a fault.
            Err(ProviderError::NotFound(_)) => ProbeOutcome::Absent,
            Err(e) => ProbeOutcome::Unknown(e),
        };
        (domain, outcome)
    }
}

/// Order candidates by confidence, ties to the higher-priority domain, keep
/// one per (domain, entity type), and split into primary and alternates.
pub fn rank(outcomes: Vec<(Domain, ProbeOutcome)>) -> (Option<CandidateEntity>, Vec<Alternate>) {
    let mut candidates: Vec<CandidateEntity> = outcomes
        .into_iter()
        .filter_map(|(_, outcome)| match outcome {
            ProbeOutcome::Candidate(candidate) => Some(candidate),
            ProbeOutcome::Absent | ProbeOutcome::Unknown(_) => None,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.domain.cmp(&b.domain))
    });

    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert((c.domain, c.entity_type)));

    let mut ranked = candidates.into_iter();
    let primary = ranked.next();
    let alternates = ranked
        .map(|candidate| Alternate {
            context: format!(
                "Also matches a {} on {}",
                candidate.entity_type,
                candidate.domain.label()
            ),
            candidate,
        })
        .collect();

    (primary, alternates)
}
