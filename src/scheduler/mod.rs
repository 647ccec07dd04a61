//! # Sync Scheduler
//!
//! Supervises one timer task per provider. Each timer fires a sync job that
//! pulls updates from the provider, merges them into stored leads and
//! re-arms itself. Jobs are single-flight per provider, tracked in a bounded
//! history, and schedule state is persisted through a [`ScheduleStore`] so
//! active schedules resume after a restart.

pub mod backoff;
pub mod history;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{ProviderRegistry, invoke_pull};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::enrichment::{UpsertOutcome, upsert_signal};
use crate::error::{AdapterError, SchedulerError};
use crate::models::{JobError, JobErrorKind, SyncJob, SyncSchedule, SyncTrigger};
use crate::repositories::{OrganizationRepository, ScheduleStore};
use crate::scoring::LeadScorer;
use crate::telemetry::{TraceContext, with_trace_context};

pub use backoff::rate_limit_backoff;
pub use history::JobHistory;

struct TimerHandle {
    token: CancellationToken,
    generation: u64,
}

struct SchedulerState {
    schedules: BTreeMap<String, SyncSchedule>,
    timers: HashMap<String, TimerHandle>,
    in_flight: HashSet<String>,
    rate_limit_strikes: HashMap<String, u32>,
    history: JobHistory,
    next_generation: u64,
}

impl SchedulerState {
    fn cancel_timer(&mut self, provider_id: &str) {
        if let Some(timer) = self.timers.remove(provider_id) {
            timer.token.cancel();
        }
    }
}

struct SchedulerInner {
    config: Arc<AppConfig>,
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn OrganizationRepository>,
    store: Arc<dyn ScheduleStore>,
    scorer: Arc<LeadScorer>,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    shutdown: CancellationToken,
}

/// Per-provider sync supervisor. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

/// How a finished run affects the provider's next timer.
enum RunOutcome {
    Succeeded,
    Failed(AdapterError),
}

impl SyncScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ProviderRegistry>,
        repository: Arc<dyn OrganizationRepository>,
        store: Arc<dyn ScheduleStore>,
        scorer: Arc<LeadScorer>,
    ) -> Self {
        let history = JobHistory::new(
            config.scheduler.job_history_limit,
            config.scheduler.job_retention_hours,
        );
        let clock = Arc::clone(scorer.clock());
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                registry,
                repository,
                store,
                scorer,
                clock,
                state: Mutex::new(SchedulerState {
                    schedules: BTreeMap::new(),
                    timers: HashMap::new(),
                    in_flight: HashSet::new(),
                    rate_limit_strikes: HashMap::new(),
                    history,
                    next_generation: 0,
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Activate or deactivate timer-driven sync for a provider.
    ///
    /// The first activation creates the schedule with the provider's default
    /// interval. Enabling an active schedule (or disabling an inactive one)
    /// changes nothing.
    pub async fn set_sync_enabled(
        &self,
        provider_id: &str,
        enabled: bool,
    ) -> Result<SyncSchedule, SchedulerError> {
        let inner = &self.inner;
        let snapshot = {
            let mut state = inner.lock();
            // A stale schedule of an unregistered provider can still be disabled.
            let registered = inner.registry.contains(provider_id);
            if !registered && (enabled || !state.schedules.contains_key(provider_id)) {
                return Err(SchedulerError::UnknownProvider {
                    provider_id: provider_id.to_string(),
                });
            }

            let default_interval = inner.default_interval(provider_id);
            let schedule = state
                .schedules
                .entry(provider_id.to_string())
                .or_insert_with(|| SyncSchedule::inactive(provider_id, default_interval));
            if schedule.is_active == enabled {
                return Ok(schedule.clone());
            }

            schedule.is_active = enabled;
            if enabled {
                let interval = minutes(schedule.interval_minutes);
                schedule.next_run = Some(inner.clock.now() + schedule.interval());
                let snapshot = schedule.clone();
                inner.arm_locked(&mut state, provider_id, interval);
                snapshot
            } else {
                schedule.next_run = None;
                let snapshot = schedule.clone();
                state.cancel_timer(provider_id);
                snapshot
            }
        };

        info!(
            provider = %provider_id,
            enabled,
            interval_minutes = snapshot.interval_minutes,
            "sync schedule toggled"
        );
        inner.store.save(&snapshot).await?;
        Ok(snapshot)
    }

    /// Change a provider's interval. An active timer is cancelled and
    /// re-armed with `next_run = now + interval`.
    pub async fn set_sync_interval(
        &self,
        provider_id: &str,
        interval_minutes: u32,
    ) -> Result<SyncSchedule, SchedulerError> {
        let inner = &self.inner;
        let bounds = &inner.config.scheduler;
        if !(bounds.min_interval_minutes..=bounds.max_interval_minutes).contains(&interval_minutes)
        {
            return Err(SchedulerError::InvalidInterval {
                minutes: interval_minutes,
                min: bounds.min_interval_minutes,
                max: bounds.max_interval_minutes,
            });
        }
        if !inner.registry.contains(provider_id) {
            return Err(SchedulerError::UnknownProvider {
                provider_id: provider_id.to_string(),
            });
        }

        let snapshot = {
            let mut state = inner.lock();
            let schedule = state
                .schedules
                .entry(provider_id.to_string())
                .or_insert_with(|| SyncSchedule::inactive(provider_id, interval_minutes));
            schedule.interval_minutes = interval_minutes;
            if schedule.is_active {
                schedule.next_run = Some(inner.clock.now() + schedule.interval());
                let snapshot = schedule.clone();
                inner.arm_locked(&mut state, provider_id, minutes(interval_minutes));
                snapshot
            } else {
                schedule.clone()
            }
        };

        info!(provider = %provider_id, interval_minutes, "sync interval changed");
        inner.store.save(&snapshot).await?;
        Ok(snapshot)
    }

    /// Run a sync for a provider now and wait for it to finish.
    ///
    /// A disconnected provider yields a failed job carrying a
    /// `NotConnected` error rather than an `Err`.
    pub async fn run_sync(&self, provider_id: &str) -> Result<SyncJob, SchedulerError> {
        if !self.inner.registry.contains(provider_id) {
            return Err(SchedulerError::UnknownProvider {
                provider_id: provider_id.to_string(),
            });
        }
        self.inner.execute(provider_id, SyncTrigger::Manual).await
    }

    pub fn get_sync_status(&self, provider_id: &str) -> Option<SyncSchedule> {
        self.inner.lock().schedules.get(provider_id).cloned()
    }

    /// All known schedules, ordered by provider id.
    pub fn list_schedules(&self) -> Vec<SyncSchedule> {
        self.inner.lock().schedules.values().cloned().collect()
    }

    /// Most recent jobs, newest first.
    pub fn get_recent_jobs(&self, limit: usize) -> Vec<SyncJob> {
        self.inner.lock().history.recent(limit)
    }

    /// Whether a job for the provider is currently running.
    pub fn is_running(&self, provider_id: &str) -> bool {
        self.inner.lock().in_flight.contains(provider_id)
    }

    /// Whether a timer is armed for the provider.
    pub fn has_timer(&self, provider_id: &str) -> bool {
        self.inner.lock().timers.contains_key(provider_id)
    }

    /// Load persisted schedules and re-arm the active ones.
    ///
    /// Overdue schedules fire immediately. Active schedules of providers that
    /// are no longer registered are kept but not armed. Returns the number of
    /// timers armed.
    pub async fn restore(&self) -> Result<usize, SchedulerError> {
        let inner = &self.inner;
        let persisted = inner.store.load_all().await?;
        let now = inner.clock.now();

        let mut armed = 0;
        let mut state = inner.lock();
        for (provider_id, schedule) in persisted {
            let active = schedule.is_active;
            let delay = match schedule.next_run {
                Some(next_run) => (next_run - now).to_std().unwrap_or(Duration::ZERO),
                None => minutes(schedule.interval_minutes),
            };
            state.schedules.insert(provider_id.clone(), schedule);

            if !active {
                continue;
            }
            if !inner.registry.contains(&provider_id) {
                warn!(provider = %provider_id, "persisted schedule for unregistered provider not armed");
                continue;
            }
            inner.arm_locked(&mut state, &provider_id, delay);
            armed += 1;
        }
        drop(state);

        info!(armed, "sync schedules restored");
        Ok(armed)
    }

    /// Forget a provider: cancel its timer, drop its schedule (persisted and
    /// in memory) and unregister it. Returns whether anything was removed.
    pub async fn remove_provider(&self, provider_id: &str) -> Result<bool, SchedulerError> {
        let inner = &self.inner;
        let had_schedule = {
            let mut state = inner.lock();
            state.cancel_timer(provider_id);
            state.rate_limit_strikes.remove(provider_id);
            state.schedules.remove(provider_id).is_some()
        };
        let was_registered = inner.registry.remove(provider_id);
        let was_stored = inner.store.remove(provider_id).await?;

        info!(provider = %provider_id, "provider removed from scheduler");
        Ok(had_schedule || was_registered || was_stored)
    }

    /// Cancel every timer. Running jobs finish and report but are not
    /// re-armed.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        let mut state = inner.lock();
        for (_, timer) in state.timers.drain() {
            timer.token.cancel();
        }
        info!("sync scheduler shut down");
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn default_interval(&self, provider_id: &str) -> u32 {
        let bounds = &self.config.scheduler;
        self.registry
            .metadata(provider_id)
            .map(|m| m.default_interval_minutes)
            .unwrap_or(bounds.default_interval_minutes)
            .clamp(bounds.min_interval_minutes, bounds.max_interval_minutes)
    }

    /// Arm (or re-arm) the provider's timer. Any previous timer is cancelled.
    fn arm_locked(self: &Arc<Self>, state: &mut SchedulerState, provider_id: &str, delay: Duration) {
        state.cancel_timer(provider_id);
        if self.shutdown.is_cancelled() {
            return;
        }

        let token = self.shutdown.child_token();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.timers.insert(
            provider_id.to_string(),
            TimerHandle {
                token: token.clone(),
                generation,
            },
        );

        debug!(provider = %provider_id, delay_secs = delay.as_secs(), "sync timer armed");
        let weak: Weak<Self> = Arc::downgrade(self);
        let provider_id = provider_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire(&provider_id, generation).await;
                    }
                }
            }
        });
    }

    async fn fire(self: &Arc<Self>, provider_id: &str, generation: u64) {
        {
            let mut state = self.lock();
            match state.timers.get(provider_id) {
                Some(timer) if timer.generation == generation => {
                    state.timers.remove(provider_id);
                }
                // Superseded or cancelled between wake-up and here.
                _ => return,
            }
        }

        match self.execute(provider_id, SyncTrigger::Timer).await {
            Ok(job) => debug!(provider = %provider_id, job_id = %job.job_id, "timer sync finished"),
            Err(SchedulerError::AlreadyRunning { .. }) => {
                info!(provider = %provider_id, "sync already running; timer fire skipped");
            }
            Err(err) => warn!(provider = %provider_id, error = %err, "timer sync failed to start"),
        }
    }

    async fn execute(
        self: &Arc<Self>,
        provider_id: &str,
        trigger: SyncTrigger,
    ) -> Result<SyncJob, SchedulerError> {
        if !self.lock().in_flight.insert(provider_id.to_string()) {
            return Err(SchedulerError::AlreadyRunning {
                provider_id: provider_id.to_string(),
            });
        }
        let in_flight = scopeguard::guard(provider_id.to_string(), |id| {
            self.lock().in_flight.remove(&id);
        });

        let started = self.clock.now();
        let mut job = SyncJob::pending(provider_id, trigger, started);
        let since = {
            let mut state = self.lock();
            state.history.record(&job, started);
            state.schedules.get(provider_id).and_then(|s| s.last_run)
        };

        if !self.registry.is_connected(provider_id) {
            job.fail(JobError::not_connected(provider_id), started);
            drop(in_flight);
            self.deactivate_disconnected(&job).await;
            self.report(&job);
            return Ok(job);
        }

        job.mark_running();
        self.lock().history.record(&job, started);
        info!(
            provider = %provider_id,
            job_id = %job.job_id,
            trigger = trigger.as_str(),
            since = ?since,
            "sync job started"
        );

        let context = TraceContext::new("sync_job", job.job_id.to_string());
        let outcome = with_trace_context(context, self.pull_and_merge(provider_id, since, &mut job)).await;

        let finished = self.clock.now();
        let outcome = match outcome {
            Ok(()) => {
                job.complete(finished);
                RunOutcome::Succeeded
            }
            Err(error) => {
                job.fail(JobError::from(&error), finished);
                if matches!(error, AdapterError::Auth { .. }) {
                    warn!(provider = %provider_id, "credentials rejected; provider marked disconnected");
                    if let Err(err) = self.registry.mark_disconnected(provider_id) {
                        warn!(provider = %provider_id, error = %err, "could not mark provider disconnected");
                    }
                }
                RunOutcome::Failed(error)
            }
        };

        drop(in_flight);
        let snapshot = self.finish(&job, &outcome);
        if let Some(schedule) = snapshot
            && let Err(err) = self.store.save(&schedule).await
        {
            error!(provider = %provider_id, error = %err, "failed to persist schedule after sync");
        }

        self.report(&job);
        Ok(job)
    }

    async fn pull_and_merge(
        &self,
        provider_id: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
        job: &mut SyncJob,
    ) -> Result<(), AdapterError> {
        let adapter = self
            .registry
            .get(provider_id)
            .map_err(|err| AdapterError::permanent(provider_id, err.to_string()))?;
        let signals = invoke_pull(adapter.as_ref(), since).await?;

        for signal in signals {
            job.records_processed += 1;
            let domain = signal.domain.clone();
            match upsert_signal(self.repository.as_ref(), &self.scorer, signal).await {
                Ok(UpsertOutcome::Added(_)) => job.records_added += 1,
                Ok(UpsertOutcome::Updated(_)) => job.records_updated += 1,
                Err(err) => {
                    warn!(provider = %provider_id, domain = %domain, error = %err, "record not persisted");
                    job.errors
                        .push(JobError::new(JobErrorKind::Repository, format!("{domain}: {err}")));
                }
            }
        }
        Ok(())
    }

    /// Record the finished job and re-arm the provider if it is still
    /// active. Returns the schedule to persist, if any.
    fn finish(self: &Arc<Self>, job: &SyncJob, outcome: &RunOutcome) -> Option<SyncSchedule> {
        let provider_id = job.provider_id.as_str();
        let finished = job.end_time.unwrap_or_else(|| self.clock.now());

        let mut state = self.lock();
        state.history.record(job, finished);

        let extra_delay = match outcome {
            RunOutcome::Succeeded => {
                state.rate_limit_strikes.remove(provider_id);
                None
            }
            RunOutcome::Failed(AdapterError::RateLimited {
                retry_after_secs, ..
            }) => {
                let strikes = state
                    .rate_limit_strikes
                    .entry(provider_id.to_string())
                    .or_insert(0);
                let backoff = rate_limit_backoff(
                    &self.config.rate_limit_policy,
                    provider_id,
                    *strikes,
                    *retry_after_secs,
                    &mut rand::thread_rng(),
                );
                *strikes = strikes.saturating_add(1);
                Some(backoff)
            }
            RunOutcome::Failed(_) => None,
        };

        let schedule = state.schedules.get_mut(provider_id)?;
        if matches!(outcome, RunOutcome::Succeeded) {
            schedule.last_run = Some(finished);
        }
        if !schedule.is_active || self.shutdown.is_cancelled() {
            schedule.next_run = None;
            return Some(schedule.clone());
        }

        let interval = minutes(schedule.interval_minutes);
        let delay = extra_delay.map_or(interval, |backoff| backoff.max(interval));
        if delay > interval {
            info!(provider = %provider_id, delay_secs = delay.as_secs(), "rate limited; next sync delayed");
        }
        schedule.next_run = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| finished.checked_add_signed(d));
        let snapshot = schedule.clone();
        self.arm_locked(&mut state, provider_id, delay);
        Some(snapshot)
    }

    async fn deactivate_disconnected(&self, job: &SyncJob) {
        let provider_id = job.provider_id.as_str();
        let snapshot = {
            let mut state = self.lock();
            state.history.record(job, job.start_time);
            state.cancel_timer(provider_id);
            state.schedules.get_mut(provider_id).map(|schedule| {
                schedule.is_active = false;
                schedule.next_run = None;
                schedule.clone()
            })
        };
        warn!(provider = %provider_id, "provider not connected; sync schedule deactivated");
        if let Some(schedule) = snapshot
            && let Err(err) = self.store.save(&schedule).await
        {
            error!(provider = %provider_id, error = %err, "failed to persist deactivated schedule");
        }
    }

    fn report(&self, job: &SyncJob) {
        let duration_ms = job
            .duration()
            .map(|d| d.num_milliseconds().max(0) as f64)
            .unwrap_or(0.0);

        counter!(
            "lead_sync_jobs_total",
            "provider" => job.provider_id.clone(),
            "status" => job.status.as_str(),
            "trigger" => job.trigger.as_str()
        )
        .increment(1);
        histogram!("lead_sync_job_duration_ms", "provider" => job.provider_id.clone())
            .record(duration_ms);

        let warn_after_ms = self.config.scheduler.long_running_warn_seconds as f64 * 1_000.0;
        if duration_ms > warn_after_ms {
            warn!(
                provider = %job.provider_id,
                job_id = %job.job_id,
                duration_ms,
                "sync job exceeded long-running threshold"
            );
        }

        info!(
            provider = %job.provider_id,
            job_id = %job.job_id,
            status = job.status.as_str(),
            processed = job.records_processed,
            added = job.records_added,
            updated = job.records_updated,
            errors = job.errors.len(),
            duration_ms,
            "sync job finished"
        );
    }
}

fn minutes(value: u32) -> Duration {
    Duration::from_secs(u64::from(value) * 60)
}
