//! Integration tests for enrichment and scoring across several providers.

use std::sync::Arc;
use std::time::Duration;

use leadintel::adapters::{
    AdapterPolicy, FailureKind, ProviderKind, ProviderRegistry, ScriptStep, ScriptedAdapter,
};
use leadintel::clock::ManualClock;
use leadintel::enrichment::{EnrichmentAggregator, fold_signals};
use leadintel::error::AdapterError;
use leadintel::models::{EngagementSignals, LeadStatus, SignalFields};
use leadintel::scoring::{LeadScorer, ScoringConfig, score};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{fixed_now, register, signal};

fn aggregator(registry: &Arc<ProviderRegistry>) -> EnrichmentAggregator {
    let clock = Arc::new(ManualClock::new(fixed_now()));
    EnrichmentAggregator::new(
        registry.clone(),
        Arc::new(LeadScorer::new(ScoringConfig::default(), clock)),
    )
}

fn respond(fields: SignalFields, confidence: f64) -> ScriptStep {
    ScriptStep::Respond { fields, confidence }
}

fn quick_policy(max_transient_retries: u32) -> AdapterPolicy {
    AdapterPolicy {
        timeout: Duration::from_secs(2),
        max_transient_retries,
    }
}

#[tokio::test]
async fn higher_confidence_wins_each_field_and_gaps_are_filled() {
    let registry = Arc::new(ProviderRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new("crm", ProviderKind::Crm).on_fetch(respond(
            SignalFields {
                industry: Some("Tech".into()),
                ..SignalFields::default()
            },
            0.9,
        )),
    );
    register(
        &registry,
        ScriptedAdapter::new("ads", ProviderKind::Ads).on_fetch(respond(
            SignalFields {
                industry: Some("Finance".into()),
                size: Some("200-500".into()),
                ..SignalFields::default()
            },
            0.4,
        )),
    );

    let enrichment = aggregator(&registry).enrich("acme.com", None).await.unwrap();

    assert_eq!(enrichment.record.industry.as_deref(), Some("Tech"));
    assert_eq!(enrichment.record.size.as_deref(), Some("200-500"));
    assert_eq!(enrichment.contributors, vec!["ads".to_string(), "crm".to_string()]);
    assert!((enrichment.confidence() - 0.65).abs() < 1e-9);
    assert!(!enrichment.is_partial());
}

#[tokio::test(start_paused = true)]
async fn hanging_provider_times_out_without_blocking_the_rest() {
    let registry = Arc::new(ProviderRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new("web", ProviderKind::Analytics)
            .with_policy(quick_policy(0))
            .on_fetch(ScriptStep::Hang),
    );
    register(
        &registry,
        ScriptedAdapter::new("crm", ProviderKind::Crm).on_fetch(respond(
            SignalFields {
                name: Some("Acme".into()),
                ..SignalFields::default()
            },
            0.95,
        )),
    );

    let enrichment = aggregator(&registry).enrich("acme.com", None).await.unwrap();

    assert_eq!(enrichment.record.name.as_deref(), Some("Acme"));
    assert_eq!(enrichment.failures.len(), 1);
    assert_eq!(enrichment.failures[0].provider_id, "web");
    assert!(matches!(
        enrichment.failures[0].error,
        AdapterError::Timeout { timeout_ms: 2_000, .. }
    ));
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() {
    let registry = Arc::new(ProviderRegistry::new());
    let flaky = register(
        &registry,
        ScriptedAdapter::new("web", ProviderKind::Analytics)
            .with_policy(quick_policy(2))
            .on_fetch(ScriptStep::Fail(FailureKind::Transient))
            .on_fetch(ScriptStep::Fail(FailureKind::Transient))
            .on_fetch(respond(
                SignalFields {
                    total_visits: Some(3),
                    ..SignalFields::default()
                },
                0.7,
            )),
    );
    let broken = register(
        &registry,
        ScriptedAdapter::new("ads", ProviderKind::Ads)
            .with_policy(quick_policy(1))
            .on_fetch(ScriptStep::Fail(FailureKind::Transient)),
    );

    let enrichment = aggregator(&registry).enrich("acme.com", None).await.unwrap();

    assert_eq!(flaky.fetch_calls(), 3);
    assert_eq!(enrichment.record.total_visits, 3);
    assert_eq!(broken.fetch_calls(), 2);
    assert!(matches!(
        enrichment.failures[0].error,
        AdapterError::Transient { .. }
    ));
}

#[tokio::test]
async fn auth_and_rate_limit_failures_are_not_retried() {
    let registry = Arc::new(ProviderRegistry::new());
    let crm = register(
        &registry,
        ScriptedAdapter::new("crm", ProviderKind::Crm)
            .with_policy(quick_policy(3))
            .on_fetch(ScriptStep::Fail(FailureKind::Auth)),
    );
    let ads = register(
        &registry,
        ScriptedAdapter::new("ads", ProviderKind::Ads)
            .with_policy(quick_policy(3))
            .on_fetch(ScriptStep::Fail(FailureKind::RateLimited(Some(30)))),
    );

    let enrichment = aggregator(&registry).enrich("acme.com", None).await.unwrap();

    assert_eq!((crm.fetch_calls(), ads.fetch_calls()), (1, 1));
    let providers: Vec<&str> = enrichment
        .failures
        .iter()
        .map(|f| f.provider_id.as_str())
        .collect();
    assert_eq!(providers, vec!["ads", "crm"]);
    assert_eq!(enrichment.record.confidence, 0.0);
}

#[tokio::test]
async fn disconnected_providers_are_not_queried() {
    let registry = Arc::new(ProviderRegistry::new());
    let crm = register(&registry, ScriptedAdapter::new("crm", ProviderKind::Crm));
    registry.mark_disconnected("crm").unwrap();

    let enrichment = aggregator(&registry).enrich("acme.com", None).await.unwrap();

    assert_eq!(crm.fetch_calls(), 0);
    assert!(enrichment.contributors.is_empty());
    assert!(enrichment.no_match.is_empty());
}

#[tokio::test]
async fn enrichment_is_scored_against_the_clock() {
    let registry = Arc::new(ProviderRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new("web", ProviderKind::Analytics).on_fetch(respond(
            SignalFields {
                total_visits: Some(12),
                engagement: Some(EngagementSignals {
                    pricing_page_visits: 1,
                    ..EngagementSignals::default()
                }),
                last_seen: Some(fixed_now()),
                ..SignalFields::default()
            },
            0.8,
        )),
    );
    register(
        &registry,
        ScriptedAdapter::new("crm", ProviderKind::Crm).on_fetch(respond(
            SignalFields {
                size: Some("1000+".into()),
                ..SignalFields::default()
            },
            0.95,
        )),
    );

    let enrichment = aggregator(&registry).enrich("acme.com", None).await.unwrap();

    assert_eq!(enrichment.score.intent, 100);
    assert_eq!(enrichment.score.fit, 90);
    assert_eq!(enrichment.score.urgency, 100);
    assert_eq!(enrichment.record.score(), 97);
    assert_eq!(enrichment.record.status(), LeadStatus::Hot);
}

#[test]
fn scoring_is_idempotent_and_decays_with_age() {
    let config = ScoringConfig::default();
    let mut fields = SignalFields {
        total_visits: Some(5),
        last_seen: Some(fixed_now()),
        ..SignalFields::default()
    };
    fields.size = Some("60".into());
    let record = fold_signals("acme.com", &[signal("web", "acme.com", fields, 0.8)], fixed_now());

    let today = score(&record, &config, fixed_now());
    assert_eq!(today, score(&record, &config, fixed_now()));

    let next_week = score(&record, &config, fixed_now() + chrono::Duration::days(7));
    assert_eq!(next_week.urgency, 30);
    assert!(next_week.score < today.score);

    let much_later = score(&record, &config, fixed_now() + chrono::Duration::days(30));
    assert_eq!(much_later.urgency, 0);
}
