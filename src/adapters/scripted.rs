//! Scripted in-process adapter
//!
//! Replays queued responses in order; the last queued step repeats once the
//! queue is drained. Used by tests and by local profiles that run without
//! provider credentials.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::trait_::AdapterPolicy;
use super::{ProviderAdapter, ProviderKind};
use crate::clock::{Clock, SystemClock};
use crate::error::AdapterError;
use crate::models::{Signal, SignalFields, SignalQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    RateLimited(Option<u64>),
    Transient,
    Permanent,
    Malformed,
}

#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// `fetch_signal` answers with these fields for the queried domain.
    /// Ignored by pulls, which answer with an empty batch.
    Respond { fields: SignalFields, confidence: f64 },
    /// `pull_updates`/`discover` answer with these signals; `fetch_signal`
    /// answers with the first one matching the queried domain.
    Batch(Vec<Signal>),
    NoMatch,
    /// Never completes.
    Hang,
    Delayed(Duration, Box<ScriptStep>),
    Fail(FailureKind),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
}

impl Script {
    fn next(&mut self) -> ScriptStep {
        match self.steps.len() {
            0 => ScriptStep::NoMatch,
            1 => self.steps[0].clone(),
            _ => self.steps.pop_front().unwrap_or(ScriptStep::NoMatch),
        }
    }
}

pub struct ScriptedAdapter {
    provider_id: String,
    kind: ProviderKind,
    policy: AdapterPolicy,
    clock: Arc<dyn Clock>,
    fetch_script: Mutex<Script>,
    pull_script: Mutex<Script>,
    discover_script: Mutex<Option<Script>>,
    fetch_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    discover_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(provider_id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind,
            policy: AdapterPolicy::default(),
            clock: Arc::new(SystemClock),
            fetch_script: Mutex::new(Script::default()),
            pull_script: Mutex::new(Script::default()),
            discover_script: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_policy(mut self, policy: AdapterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn on_fetch(self, step: ScriptStep) -> Self {
        lock(&self.fetch_script).steps.push_back(step);
        self
    }

    pub fn on_pull(self, step: ScriptStep) -> Self {
        lock(&self.pull_script).steps.push_back(step);
        self
    }

    /// Script `discover` separately; without this it replays the pull script.
    pub fn on_discover(self, step: ScriptStep) -> Self {
        lock(&self.discover_script)
            .get_or_insert_with(Script::default)
            .steps
            .push_back(step);
        self
    }

    /// Append a step to the pull script after construction.
    pub fn push_pull(&self, step: ScriptStep) {
        let mut script = lock(&self.pull_script);
        // A single remaining step is the sticky default; replace it.
        if script.steps.len() == 1 {
            script.steps.clear();
        }
        script.steps.push_back(step);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    fn failure(&self, kind: FailureKind) -> AdapterError {
        let provider = self.provider_id.clone();
        match kind {
            FailureKind::Auth => AdapterError::auth(provider, "scripted credential rejection"),
            FailureKind::RateLimited(retry_after) => {
                AdapterError::rate_limited(provider, retry_after)
            }
            FailureKind::Transient => AdapterError::transient(provider, "scripted transient failure"),
            FailureKind::Permanent => AdapterError::permanent(provider, "scripted permanent failure"),
            FailureKind::Malformed => AdapterError::malformed(provider, "scripted malformed payload"),
        }
    }

    async fn play_fetch(
        &self,
        step: ScriptStep,
        query: &SignalQuery,
    ) -> Result<Option<Signal>, AdapterError> {
        let mut step = step;
        loop {
            match step {
                ScriptStep::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                ScriptStep::Hang => std::future::pending::<()>().await,
                ScriptStep::Fail(kind) => return Err(self.failure(kind)),
                ScriptStep::NoMatch => return Ok(None),
                ScriptStep::Respond { fields, confidence } => {
                    return Ok(Some(Signal::new(
                        self.provider_id.clone(),
                        query.domain.clone(),
                        fields,
                        confidence,
                        self.clock.now(),
                    )));
                }
                ScriptStep::Batch(signals) => {
                    return Ok(signals.into_iter().find(|s| s.domain == query.domain));
                }
            }
        }
    }

    async fn play_batch(&self, step: ScriptStep) -> Result<Vec<Signal>, AdapterError> {
        let mut step = step;
        loop {
            match step {
                ScriptStep::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                ScriptStep::Hang => std::future::pending::<()>().await,
                ScriptStep::Fail(kind) => return Err(self.failure(kind)),
                ScriptStep::NoMatch | ScriptStep::Respond { .. } => return Ok(Vec::new()),
                ScriptStep::Batch(signals) => return Ok(signals),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn policy(&self) -> AdapterPolicy {
        self.policy
    }

    async fn fetch_signal(&self, query: &SignalQuery) -> Result<Option<Signal>, AdapterError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.fetch_script).next();
        self.play_fetch(step, query).await
    }

    async fn pull_updates(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>, AdapterError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.pull_script).next();
        self.play_batch(step).await
    }

    async fn discover(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Signal>, AdapterError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.discover_script).as_mut().map(Script::next);
        match step {
            Some(step) => self.play_batch(step).await,
            None => self.pull_updates(since).await,
        }
    }
}
