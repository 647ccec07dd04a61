//! Integration tests for the discovery poller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leadintel::adapters::{
    FailureKind, ProviderKind, ProviderMetadata, ProviderRegistry, ScriptStep, ScriptedAdapter,
};
use leadintel::clock::{Clock, ManualClock};
use leadintel::config::AppConfig;
use leadintel::discovery::{DiscoveryListener, DiscoveryPoller, DiscoveryStats};
use leadintel::enrichment::EnrichmentAggregator;
use leadintel::error::DiscoveryError;
use leadintel::models::{DiscoveryEvent, DiscoveryEventType, Signal, SignalFields};
use leadintel::repositories::{InMemoryOrganizationRepository, OrganizationRepository};
use leadintel::scoring::LeadScorer;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{engagement, fixed_now, register, register_with, signal, visits};

struct Harness {
    poller: DiscoveryPoller,
    registry: Arc<ProviderRegistry>,
    repository: Arc<InMemoryOrganizationRepository>,
    events: Arc<Mutex<Vec<DiscoveryEvent>>>,
}

fn config(auto_enrich: bool) -> AppConfig {
    let mut config = AppConfig::default();
    config.discovery.auto_enrich = auto_enrich;
    config.discovery.min_engagement_score = 60;
    config.discovery.poll_interval_seconds = 300;
    config
}

fn harness_with(config: AppConfig, clock: Arc<dyn Clock>) -> Harness {
    let registry = Arc::new(ProviderRegistry::new());
    let repository = Arc::new(InMemoryOrganizationRepository::new());
    let scorer = Arc::new(LeadScorer::new(config.scoring.clone(), clock));
    let aggregator = Arc::new(EnrichmentAggregator::new(registry.clone(), scorer));
    let poller = DiscoveryPoller::new(
        Arc::new(config),
        registry.clone(),
        aggregator,
        repository.clone(),
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    poller.add_listener(move |event: &DiscoveryEvent| sink.lock().unwrap().push(event.clone()));

    Harness {
        poller,
        registry,
        repository,
        events,
    }
}

fn harness(auto_enrich: bool) -> Harness {
    harness_with(config(auto_enrich), Arc::new(ManualClock::new(fixed_now())))
}

fn event_types(h: &Harness) -> Vec<(DiscoveryEventType, String)> {
    h.events
        .lock()
        .unwrap()
        .iter()
        .map(|e| (e.event_type, e.organization.domain.clone()))
        .collect()
}

struct PanickingListener;

impl DiscoveryListener for PanickingListener {
    fn on_event(&self, _event: &DiscoveryEvent) {
        panic!("listener failure");
    }
}

fn web_reporting(candidates: Vec<Signal>) -> ScriptedAdapter {
    ScriptedAdapter::new("web", ProviderKind::Analytics).on_discover(ScriptStep::Batch(candidates))
}

#[tokio::test]
async fn candidates_below_the_threshold_are_discarded() {
    let h = harness(false);
    // 8 visits: intent 24, fit 50, urgency 100 => 55.
    // One pricing-page visit: intent 70 => 73.
    register(
        &h.registry,
        web_reporting(vec![
            signal("web", "acme.com", visits(8), 0.7),
            signal("web", "globex.com", engagement(1, 0, 0), 0.7),
        ]),
    );

    let stats = h.poller.discover_now().await;

    assert_eq!(
        stats,
        DiscoveryStats {
            discovered: 1,
            processed: 1,
            discarded: 1,
            ..DiscoveryStats::default()
        }
    );
    assert!(h.repository.find_by_domain("acme.com").await.unwrap().is_none());
    let globex = h.repository.find_by_domain("globex.com").await.unwrap().unwrap();
    assert_eq!(globex.score(), 73);
    assert_eq!(
        event_types(&h),
        vec![(DiscoveryEventType::NewLead, "globex.com".to_string())]
    );
}

#[tokio::test]
async fn known_domains_emit_lead_updated() {
    let h = harness(false);
    register(
        &h.registry,
        web_reporting(vec![signal("web", "https://www.Globex.com/pricing", engagement(1, 0, 0), 0.7)]),
    );

    let first = h.poller.discover_now().await;
    let second = h.poller.discover_now().await;

    assert_eq!((first.discovered, first.processed), (1, 1));
    assert_eq!((second.discovered, second.processed), (0, 1));
    assert_eq!(h.repository.len(), 1);
    assert_eq!(
        event_types(&h),
        vec![
            (DiscoveryEventType::NewLead, "globex.com".to_string()),
            (DiscoveryEventType::LeadUpdated, "globex.com".to_string()),
        ]
    );
}

#[tokio::test]
async fn high_value_activity_follows_the_lead_event() {
    let h = harness(false);
    // Pricing page plus a form submission caps intent at 100 => 85.
    register(
        &h.registry,
        web_reporting(vec![signal("web", "initech.com", engagement(2, 1, 0), 0.7)]),
    );

    h.poller.discover_now().await;

    let events = h.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, DiscoveryEventType::NewLead);
    assert_eq!(events[1].event_type, DiscoveryEventType::HighValueActivity);
    assert_eq!(events[1].organization.score(), 85);
    assert_eq!(events[1].source_provider, "web");
    assert!(events[1].reasons[0].contains("score 85"));
    assert!(events[0].reasons.iter().any(|r| r.contains("pricing page 2 times")));
    assert!(events[0].reasons.iter().any(|r| r.contains("submitted 1 form")));
}

#[tokio::test]
async fn confident_provider_match_is_high_value() {
    let h = harness(false);
    // 13 visits: intent 39 => 61, below the high-value score.
    register(
        &h.registry,
        web_reporting(vec![signal("web", "hooli.com", visits(13), 0.95)]),
    );

    h.poller.discover_now().await;

    let events = h.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, DiscoveryEventType::HighValueActivity);
    assert_eq!(events[1].organization.score(), 61);
    assert!((events[1].confidence - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn new_leads_are_enriched_from_connected_providers() {
    let h = harness(true);
    register(
        &h.registry,
        web_reporting(vec![signal("web", "globex.com", engagement(1, 0, 0), 0.7)]),
    );
    let crm = register_with(
        &h.registry,
        ScriptedAdapter::new("crm", ProviderKind::Crm).on_fetch(ScriptStep::Respond {
            fields: SignalFields {
                name: Some("Globex Corporation".into()),
                size: Some("1,000+".into()),
                ..SignalFields::default()
            },
            confidence: 0.95,
        }),
        ProviderMetadata::new("crm", ProviderKind::Crm).with_discovery(false),
    );

    let stats = h.poller.discover_now().await;

    assert_eq!(stats.discovered, 1);
    assert_eq!(crm.fetch_calls(), 1);
    assert_eq!(crm.discover_calls(), 0);
    let stored = h.repository.find_by_domain("globex.com").await.unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("Globex Corporation"));
    // Intent 70, fit 90 (1,000+ employees), urgency 100 => 85.
    assert_eq!(stored.score(), 85);
    assert_eq!(stored.engagement.pricing_page_visits, 1);
}

#[tokio::test]
async fn duplicate_candidates_collapse_within_a_tick() {
    let h = harness(false);
    let older = signal("web", "globex.com", engagement(1, 0, 0), 0.7);
    let mut newer = signal("web", "WWW.GLOBEX.COM", engagement(3, 0, 0), 0.7);
    newer.captured_at = older.captured_at + chrono::Duration::minutes(1);
    register(&h.registry, web_reporting(vec![older, newer]));
    register(
        &h.registry,
        ScriptedAdapter::new("ads", ProviderKind::Ads).on_discover(ScriptStep::Batch(vec![signal(
            "ads",
            "globex.com",
            engagement(1, 0, 0),
            0.6,
        )])),
    );

    let stats = h.poller.discover_now().await;

    // One candidate per provider; the second provider updates the new lead.
    assert_eq!((stats.discovered, stats.processed), (1, 2));
    assert_eq!(
        event_types(&h),
        vec![
            (DiscoveryEventType::NewLead, "globex.com".to_string()),
            (DiscoveryEventType::LeadUpdated, "globex.com".to_string()),
        ]
    );
    let stored = h.repository.find_by_domain("globex.com").await.unwrap().unwrap();
    assert_eq!(stored.engagement.pricing_page_visits, 3);
}

#[tokio::test]
async fn failing_provider_does_not_stop_the_pass() {
    let h = harness(false);
    register(
        &h.registry,
        ScriptedAdapter::new("ads", ProviderKind::Ads)
            .on_discover(ScriptStep::Fail(FailureKind::Permanent)),
    );
    register(
        &h.registry,
        web_reporting(vec![signal("web", "globex.com", engagement(1, 0, 0), 0.7)]),
    );

    let stats = h.poller.discover_now().await;
    assert_eq!(stats.failed_providers, 1);
    assert_eq!(stats.processed, 1);
}

#[tokio::test]
async fn disconnected_and_non_discovery_providers_are_skipped() {
    let h = harness(false);
    let web = register(
        &h.registry,
        web_reporting(vec![signal("web", "globex.com", engagement(1, 0, 0), 0.7)]),
    );
    let crm = register(
        &h.registry,
        ScriptedAdapter::new("crm", ProviderKind::Crm).on_discover(ScriptStep::Batch(Vec::new())),
    );
    h.registry.mark_disconnected("web").unwrap();

    let stats = h.poller.discover_now().await;
    assert_eq!(stats, DiscoveryStats::default());
    assert_eq!(web.discover_calls(), 0);
    assert_eq!(crm.discover_calls(), 0);
}

#[tokio::test]
async fn persistence_failures_are_counted() {
    let h = harness(false);
    register(
        &h.registry,
        web_reporting(vec![signal("web", "globex.com", engagement(1, 0, 0), 0.7)]),
    );
    h.repository.set_fail_writes(true);

    let stats = h.poller.discover_now().await;
    assert_eq!(stats.failed_candidates, 1);
    assert_eq!(stats.processed, 0);
    assert!(h.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn panicking_listener_does_not_block_the_others() {
    let h = harness(false);
    register(
        &h.registry,
        web_reporting(vec![signal("web", "globex.com", engagement(1, 0, 0), 0.7)]),
    );
    h.poller.add_listener(PanickingListener);
    let after = Arc::new(AtomicUsize::new(0));
    let counter = after.clone();
    h.poller.add_listener(move |_: &DiscoveryEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let stats = h.poller.discover_now().await;

    assert_eq!(stats.processed, 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(h.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn removed_listeners_stop_receiving_events() {
    let h = harness(false);
    register(
        &h.registry,
        web_reporting(vec![signal("web", "globex.com", engagement(1, 0, 0), 0.7)]),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = h.poller.add_listener(move |_: &DiscoveryEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.poller.discover_now().await;
    assert!(h.poller.remove_listener(id));
    assert!(!h.poller.remove_listener(id));
    h.poller.discover_now().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn loop_polls_on_the_configured_interval() {
    let h = harness(false);
    let web = register(&h.registry, web_reporting(Vec::new()));

    h.poller.start().unwrap();
    assert!(h.poller.is_running());
    assert!(matches!(h.poller.start(), Err(DiscoveryError::AlreadyRunning)));

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(web.discover_calls(), 1);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(web.discover_calls(), 2);

    h.poller.stop().await;
    assert!(!h.poller.is_running());
    tokio::time::sleep(Duration::from_secs(900)).await;
    assert_eq!(web.discover_calls(), 2);

    // Restartable after a stop.
    h.poller.start().unwrap();
    h.poller.stop().await;
}

#[tokio::test]
async fn disabled_poller_refuses_to_start() {
    let mut config = config(false);
    config.discovery.enabled = false;
    let h = harness_with(config, Arc::new(ManualClock::new(fixed_now())));

    assert!(matches!(h.poller.start(), Err(DiscoveryError::Disabled)));
    assert!(!h.poller.is_running());

    // Manual passes still work.
    assert_eq!(h.poller.discover_now().await, DiscoveryStats::default());
}
