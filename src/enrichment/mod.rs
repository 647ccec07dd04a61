//! Enrichment Aggregator
//!
//! Fans a lookup out to every connected provider, waits for all of them and
//! folds whatever came back into one scored `OrganizationRecord`. Provider
//! failures never fail the enrichment; they are reported per provider in
//! [`Enrichment::failures`].

pub mod merge;
pub mod persist;

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::{ProviderRegistry, invoke_fetch};
use crate::domain::normalize_domain;
use crate::error::{AdapterError, EnrichmentError};
use crate::models::{OrganizationRecord, Signal, SignalQuery};
use crate::scoring::{LeadScore, LeadScorer};
use crate::telemetry::{current_context, with_optional_trace_context};

pub use merge::{PERSISTED_SOURCE, fold_signals, merge_into, merge_records, record_signals};
pub use persist::{UpsertOutcome, upsert_record, upsert_signal};

/// A provider that failed during an enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterFailure {
    pub provider_id: String,
    pub error: AdapterError,
}

/// Result of one enrichment pass.
#[derive(Debug, Clone)]
pub struct Enrichment {
    /// Merged and scored record. Not persisted.
    pub record: OrganizationRecord,
    pub score: LeadScore,
    /// Providers that returned a signal, sorted.
    pub contributors: Vec<String>,
    /// Providers that answered without a match, sorted.
    pub no_match: Vec<String>,
    /// Providers that failed, sorted by provider id.
    pub failures: Vec<AdapterFailure>,
}

impl Enrichment {
    pub fn confidence(&self) -> f64 {
        self.record.confidence
    }

    /// Whether at least one provider failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
struct Collected {
    signals: Vec<Signal>,
    contributors: Vec<String>,
    no_match: Vec<String>,
    failures: Vec<AdapterFailure>,
}

pub struct EnrichmentAggregator {
    registry: Arc<ProviderRegistry>,
    scorer: Arc<LeadScorer>,
}

impl EnrichmentAggregator {
    pub fn new(registry: Arc<ProviderRegistry>, scorer: Arc<LeadScorer>) -> Self {
        Self { registry, scorer }
    }

    pub fn scorer(&self) -> &Arc<LeadScorer> {
        &self.scorer
    }

    /// Enrich a domain (and optional visitor IP) from all connected providers.
    pub async fn enrich(
        &self,
        domain: &str,
        ip_address: Option<IpAddr>,
    ) -> Result<Enrichment, EnrichmentError> {
        self.enrich_with(domain, ip_address, Vec::new()).await
    }

    /// Like [`enrich`](Self::enrich), folding `extra` signals in with the
    /// providers' answers.
    pub async fn enrich_with(
        &self,
        domain: &str,
        ip_address: Option<IpAddr>,
        extra: Vec<Signal>,
    ) -> Result<Enrichment, EnrichmentError> {
        let domain = normalize_domain(domain)?;
        let query = SignalQuery {
            domain: domain.clone(),
            ip_address,
        };

        let mut collected = self.collect(&query).await;
        collected
            .signals
            .extend(extra.into_iter().map(|signal| Signal { domain: domain.clone(), ..signal }));

        let mut record = fold_signals(&domain, &collected.signals, self.scorer.now());
        let score = self.scorer.apply(&mut record);

        info!(
            domain = %domain,
            contributors = collected.contributors.len(),
            failures = collected.failures.len(),
            confidence = record.confidence,
            score = score.score,
            "enrichment completed"
        );

        Ok(Enrichment {
            record,
            score,
            contributors: collected.contributors,
            no_match: collected.no_match,
            failures: collected.failures,
        })
    }

    async fn collect(&self, query: &SignalQuery) -> Collected {
        let adapters = self.registry.connected_adapters();
        let trace = current_context();

        let mut tasks = JoinSet::new();
        for adapter in &adapters {
            let adapter = Arc::clone(adapter);
            let query = query.clone();
            let trace = trace.clone();
            tasks.spawn(async move {
                let provider_id = adapter.provider_id().to_string();
                let result =
                    with_optional_trace_context(trace, invoke_fetch(adapter.as_ref(), &query)).await;
                (provider_id, result)
            });
        }

        let mut collected = Collected::default();
        let mut answered = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (provider_id, result) = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "adapter task aborted");
                    continue;
                }
            };
            answered.insert(provider_id.clone());

            match result {
                Ok(Some(signal)) => {
                    debug!(provider = %provider_id, confidence = signal.confidence, "signal received");
                    collected.signals.push(Signal {
                        domain: query.domain.clone(),
                        ..signal
                    });
                    collected.contributors.push(provider_id);
                }
                Ok(None) => collected.no_match.push(provider_id),
                Err(error) => collected.failures.push(AdapterFailure { provider_id, error }),
            }
        }

        // A task that panicked never reported its id.
        for adapter in &adapters {
            let provider_id = adapter.provider_id();
            if !answered.contains(provider_id) {
                collected.failures.push(AdapterFailure {
                    provider_id: provider_id.to_string(),
                    error: AdapterError::permanent(provider_id, "adapter task panicked"),
                });
            }
        }

        for failure in &collected.failures {
            warn!(
                provider = %failure.provider_id,
                kind = failure.error.kind_label(),
                error = %failure.error,
                domain = %query.domain,
                "provider failed during enrichment"
            );
            counter!(
                "lead_enrichment_adapter_failures_total",
                "provider" => failure.provider_id.clone(),
                "kind" => failure.error.kind_label()
            )
            .increment(1);
        }

        collected.contributors.sort();
        collected.no_match.sort();
        collected
            .failures
            .sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        FailureKind, ProviderAdapter, ProviderKind, ProviderMetadata, ScriptStep, ScriptedAdapter,
    };
    use crate::clock::ManualClock;
    use crate::models::SignalFields;
    use crate::scoring::ScoringConfig;
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn aggregator(adapters: Vec<ScriptedAdapter>) -> EnrichmentAggregator {
        let registry = Arc::new(ProviderRegistry::new());
        for adapter in adapters {
            let metadata = ProviderMetadata::new(adapter.provider_id().to_string(), adapter.kind());
            registry.register(Arc::new(adapter), metadata);
        }
        let clock = Arc::new(ManualClock::new(now()));
        EnrichmentAggregator::new(
            registry,
            Arc::new(LeadScorer::new(ScoringConfig::default(), clock)),
        )
    }

    #[tokio::test]
    async fn failing_provider_does_not_block_the_others() {
        let aggregator = aggregator(vec![
            ScriptedAdapter::new("crm", ProviderKind::Crm).on_fetch(ScriptStep::Respond {
                fields: SignalFields {
                    name: Some("Acme".into()),
                    ..SignalFields::default()
                },
                confidence: 0.9,
            }),
            ScriptedAdapter::new("ads", ProviderKind::Ads)
                .on_fetch(ScriptStep::Fail(FailureKind::Permanent)),
        ]);

        let enrichment = aggregator.enrich("https://www.Acme.com/", None).await.unwrap();
        assert_eq!(enrichment.record.domain, "acme.com");
        assert_eq!(enrichment.record.name.as_deref(), Some("Acme"));
        assert_eq!(enrichment.contributors, vec!["crm".to_string()]);
        assert!(enrichment.is_partial());
        assert_eq!(enrichment.failures[0].provider_id, "ads");
        assert!((enrichment.confidence() - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_match_everywhere_yields_domain_only_record() {
        let aggregator = aggregator(vec![
            ScriptedAdapter::new("crm", ProviderKind::Crm),
            ScriptedAdapter::new("web", ProviderKind::Analytics),
        ]);
        let enrichment = aggregator.enrich("acme.com", None).await.unwrap();
        assert_eq!(enrichment.record.confidence, 0.0);
        assert_eq!(enrichment.no_match, vec!["crm".to_string(), "web".to_string()]);
        assert!(!enrichment.is_partial());
    }

    #[tokio::test]
    async fn invalid_domain_is_the_only_error() {
        let aggregator = aggregator(vec![]);
        assert!(matches!(
            aggregator.enrich("   ", None).await,
            Err(EnrichmentError::InvalidDomain(_))
        ));
    }

    #[tokio::test]
    async fn extra_signals_are_folded_in() {
        let aggregator = aggregator(vec![ScriptedAdapter::new("crm", ProviderKind::Crm)]);
        let extra = Signal::new(
            "web",
            "ACME.com",
            SignalFields {
                total_visits: Some(7),
                ..SignalFields::default()
            },
            0.6,
            now(),
        );
        let enrichment = aggregator
            .enrich_with("acme.com", None, vec![extra])
            .await
            .unwrap();
        assert_eq!(enrichment.record.total_visits, 7);
        assert_eq!(enrichment.score.score, enrichment.record.score());
    }
}
