//! # Discovery Poller
//!
//! Periodically asks every connected, discovery-enabled provider for
//! organizations it has seen since the last poll. Candidates that clear the
//! engagement threshold are de-duplicated against stored leads, persisted and
//! announced to listeners as [`DiscoveryEvent`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{ProviderRegistry, invoke_discover};
use crate::config::AppConfig;
use crate::domain::normalize_domain;
use crate::enrichment::{EnrichmentAggregator, fold_signals, merge_into};
use crate::error::{AdapterError, DiscoveryError, RepositoryError};
use crate::models::{DiscoveryEvent, DiscoveryEventType, OrganizationRecord, Signal};
use crate::repositories::OrganizationRepository;
use crate::scoring::LeadScorer;
use crate::telemetry::{
    TraceContext, current_context, with_optional_trace_context, with_trace_context,
};

/// Receives discovery events. Called synchronously, in emission order.
pub trait DiscoveryListener: Send + Sync {
    fn on_event(&self, event: &DiscoveryEvent);
}

impl<F> DiscoveryListener for F
where
    F: Fn(&DiscoveryEvent) + Send + Sync,
{
    fn on_event(&self, event: &DiscoveryEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// New leads persisted.
    pub discovered: usize,
    /// Candidates that cleared the threshold and were persisted.
    pub processed: usize,
    /// Candidates below the engagement threshold or with unusable domains.
    pub discarded: usize,
    /// Providers whose discovery call failed.
    pub failed_providers: usize,
    /// Candidates that could not be persisted.
    pub failed_candidates: usize,
}

struct LoopHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct PollerInner {
    config: Arc<AppConfig>,
    registry: Arc<ProviderRegistry>,
    aggregator: Arc<EnrichmentAggregator>,
    repository: Arc<dyn OrganizationRepository>,
    scorer: Arc<LeadScorer>,
    listeners: Mutex<BTreeMap<ListenerId, Arc<dyn DiscoveryListener>>>,
    next_listener_id: AtomicU64,
    last_polled: Mutex<HashMap<String, DateTime<Utc>>>,
    tick_lock: tokio::sync::Mutex<()>,
    loop_handle: Mutex<Option<LoopHandle>>,
}

/// Periodic lead discovery. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiscoveryPoller {
    inner: Arc<PollerInner>,
}

impl DiscoveryPoller {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ProviderRegistry>,
        aggregator: Arc<EnrichmentAggregator>,
        repository: Arc<dyn OrganizationRepository>,
    ) -> Self {
        let scorer = Arc::clone(aggregator.scorer());
        Self {
            inner: Arc::new(PollerInner {
                config,
                registry,
                aggregator,
                repository,
                scorer,
                listeners: Mutex::new(BTreeMap::new()),
                next_listener_id: AtomicU64::new(1),
                last_polled: Mutex::new(HashMap::new()),
                tick_lock: tokio::sync::Mutex::new(()),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Start the polling loop. The first pass runs one poll interval from now.
    pub fn start(&self) -> Result<(), DiscoveryError> {
        let inner = &self.inner;
        if !inner.config.discovery.enabled {
            return Err(DiscoveryError::Disabled);
        }

        let mut handle = lock(&inner.loop_handle);
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let interval = inner.config.discovery.poll_interval();
        let weak: Weak<PollerInner> = Arc::downgrade(inner);
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = sleep(interval) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.tick().await;
                    }
                }
            }
            debug!("discovery loop exited");
        });

        *handle = Some(LoopHandle { token, task });
        info!(interval_secs = interval.as_secs(), "discovery poller started");
        Ok(())
    }

    /// Stop the polling loop and wait for an in-progress pass to finish.
    pub async fn stop(&self) {
        let handle = lock(&self.inner.loop_handle).take();
        if let Some(handle) = handle {
            handle.token.cancel();
            if let Err(err) = handle.task.await {
                warn!(error = %err, "discovery loop ended abnormally");
            }
            info!("discovery poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.loop_handle)
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Run one discovery pass now. Passes never overlap.
    pub async fn discover_now(&self) -> DiscoveryStats {
        self.inner.tick().await
    }

    pub fn add_listener(&self, listener: impl DiscoveryListener + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.listeners).insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove(&id).is_some()
    }
}

impl PollerInner {
    async fn tick(&self) -> DiscoveryStats {
        let _pass = self.tick_lock.lock().await;
        let context = TraceContext::new("discovery_tick", Uuid::new_v4().to_string());
        with_trace_context(context, self.run_pass()).await
    }

    async fn run_pass(&self) -> DiscoveryStats {
        let started = Instant::now();
        let mut stats = DiscoveryStats::default();

        let candidates = self.gather(&mut stats).await;
        for signal in candidates {
            self.process(signal, &mut stats).await;
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        histogram!("lead_discovery_tick_duration_ms").record(elapsed_ms);
        info!(
            discovered = stats.discovered,
            processed = stats.processed,
            discarded = stats.discarded,
            failed_providers = stats.failed_providers,
            failed_candidates = stats.failed_candidates,
            elapsed_ms,
            "discovery pass finished"
        );
        stats
    }

    /// Poll every discovery provider concurrently and return the normalized,
    /// de-duplicated candidates in processing order.
    async fn gather(&self, stats: &mut DiscoveryStats) -> Vec<Signal> {
        let adapters = self.registry.discovery_adapters();
        let polled_at = self.scorer.now();
        let trace = current_context();

        let mut tasks = JoinSet::new();
        for adapter in &adapters {
            let adapter = Arc::clone(adapter);
            let since = lock(&self.last_polled).get(adapter.provider_id()).copied();
            let trace = trace.clone();
            tasks.spawn(async move {
                let provider_id = adapter.provider_id().to_string();
                let result =
                    with_optional_trace_context(trace, invoke_discover(adapter.as_ref(), since)).await;
                (provider_id, result)
            });
        }

        let mut answered = BTreeSet::new();
        let mut raw: Vec<Signal> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((provider_id, result)) = joined else {
                continue;
            };
            answered.insert(provider_id.clone());
            match result {
                Ok(signals) => {
                    debug!(provider = %provider_id, candidates = signals.len(), "provider polled");
                    lock(&self.last_polled).insert(provider_id, polled_at);
                    raw.extend(signals);
                }
                Err(err) => self.provider_failed(&provider_id, &err, stats),
            }
        }
        for adapter in &adapters {
            let provider_id = adapter.provider_id();
            if !answered.contains(provider_id) {
                let err = AdapterError::permanent(provider_id, "discovery task panicked");
                self.provider_failed(provider_id, &err, stats);
            }
        }

        // One candidate per (provider, domain); the newest capture wins.
        let mut unique: BTreeMap<(String, String), Signal> = BTreeMap::new();
        for signal in raw {
            let domain = match normalize_domain(&signal.domain) {
                Ok(domain) => domain,
                Err(err) => {
                    debug!(provider = %signal.source_id, error = %err, "candidate with unusable domain dropped");
                    stats.discarded += 1;
                    continue;
                }
            };
            let key = (signal.source_id.clone(), domain.clone());
            let signal = Signal { domain, ..signal };
            match unique.get(&key) {
                Some(kept) if kept.captured_at >= signal.captured_at => {}
                _ => {
                    unique.insert(key, signal);
                }
            }
        }
        unique.into_values().collect()
    }

    fn provider_failed(&self, provider_id: &str, err: &AdapterError, stats: &mut DiscoveryStats) {
        warn!(
            provider = %provider_id,
            kind = err.kind_label(),
            error = %err,
            "discovery poll failed"
        );
        stats.failed_providers += 1;
    }

    async fn process(&self, signal: Signal, stats: &mut DiscoveryStats) {
        let config = &self.config.discovery;
        let now = self.scorer.now();

        let standalone = fold_signals(&signal.domain, std::slice::from_ref(&signal), now);
        let candidate_score = self.scorer.score(&standalone);
        if candidate_score.score < config.min_engagement_score {
            debug!(
                domain = %signal.domain,
                provider = %signal.source_id,
                score = candidate_score.score,
                threshold = config.min_engagement_score,
                "candidate below engagement threshold"
            );
            stats.discarded += 1;
            return;
        }

        let stored = match self.persist(&signal, standalone).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(domain = %signal.domain, error = %err, "discovered lead not persisted");
                stats.failed_candidates += 1;
                return;
            }
        };
        stats.processed += 1;

        let (record, event_type) = match stored {
            Persisted::New(record) => {
                stats.discovered += 1;
                (record, DiscoveryEventType::NewLead)
            }
            Persisted::Updated(record) => (record, DiscoveryEventType::LeadUpdated),
        };

        let reasons = describe(&record, &signal, self.scorer.config().intent.deep_page_depth_threshold);
        let mut high_value = Vec::new();
        if record.score() >= config.high_value_score {
            high_value.push(format!(
                "score {} reached the high-value threshold of {}",
                record.score(),
                config.high_value_score
            ));
        }
        if signal.confidence >= config.high_value_confidence {
            high_value.push(format!(
                "{} matched with {:.0}% confidence",
                signal.source_id,
                signal.confidence * 100.0
            ));
        }

        self.emit(DiscoveryEvent {
            event_type,
            organization: record.clone(),
            source_provider: signal.source_id.clone(),
            timestamp: now,
            confidence: signal.confidence,
            reasons: reasons.clone(),
        });

        if !high_value.is_empty() {
            high_value.extend(reasons);
            self.emit(DiscoveryEvent {
                event_type: DiscoveryEventType::HighValueActivity,
                organization: record,
                source_provider: signal.source_id,
                timestamp: now,
                confidence: signal.confidence,
                reasons: high_value,
            });
        }
    }

    async fn persist(
        &self,
        signal: &Signal,
        standalone: OrganizationRecord,
    ) -> Result<Persisted, RepositoryError> {
        let now = self.scorer.now();
        match self.repository.find_by_domain(&signal.domain).await? {
            Some(existing) => {
                let mut merged = merge_into(&existing, std::slice::from_ref(signal), now);
                self.scorer.apply(&mut merged);
                Ok(Persisted::Updated(self.repository.upsert(merged).await?))
            }
            None => {
                let mut record = if self.config.discovery.auto_enrich {
                    match self
                        .aggregator
                        .enrich_with(&signal.domain, None, vec![signal.clone()])
                        .await
                    {
                        Ok(enrichment) => enrichment.record,
                        Err(err) => {
                            warn!(domain = %signal.domain, error = %err, "auto-enrichment skipped");
                            standalone
                        }
                    }
                } else {
                    standalone
                };
                self.scorer.apply(&mut record);
                Ok(Persisted::New(self.repository.upsert(record).await?))
            }
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        let listeners: Vec<Arc<dyn DiscoveryListener>> =
            lock(&self.listeners).values().cloned().collect();

        counter!("lead_discovery_events_total", "type" => event.event_type.as_str()).increment(1);
        info!(
            event = event.event_type.as_str(),
            domain = %event.organization.domain,
            provider = %event.source_provider,
            score = event.organization.score(),
            "discovery event"
        );

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))).is_err() {
                warn!(event = event.event_type.as_str(), "discovery listener panicked");
            }
        }
    }
}

enum Persisted {
    New(OrganizationRecord),
    Updated(OrganizationRecord),
}

/// Human-readable reasons for an event.
fn describe(record: &OrganizationRecord, signal: &Signal, deep_page_threshold: u32) -> Vec<String> {
    let mut reasons = Vec::new();
    let engagement = &record.engagement;

    if record.total_visits > 0 {
        reasons.push(format!("{} visits recorded", record.total_visits));
    }
    if engagement.pricing_page_visits > 0 {
        reasons.push(format!(
            "viewed the pricing page {} {}",
            engagement.pricing_page_visits,
            plural(engagement.pricing_page_visits, "time", "times")
        ));
    }
    if engagement.form_submissions > 0 {
        reasons.push(format!(
            "submitted {} {}",
            engagement.form_submissions,
            plural(engagement.form_submissions, "form", "forms")
        ));
    }
    if engagement.max_page_depth >= deep_page_threshold {
        reasons.push(format!("browsed {} pages in one session", engagement.max_page_depth));
    }
    reasons.push(format!("lead score {} ({})", record.score(), record.status()));
    reasons.push(format!(
        "reported by {} with confidence {:.2}",
        signal.source_id, signal.confidence
    ));
    reasons
}

fn plural(count: u32, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 { one } else { many }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}
