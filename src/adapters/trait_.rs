//! Provider adapter trait definition
//!
//! Every data source (analytics, ads, CRM) implements [`ProviderAdapter`].
//! Adapters translate provider payloads into [`Signal`]s and classify their
//! failures into [`AdapterError`]; they never retry or time out on their own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ProviderKind;
use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::models::{Signal, SignalQuery};

/// Per-adapter call policy enforced by the `invoke_*` helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterPolicy {
    pub timeout: Duration,
    /// Immediate retries for `AdapterError::Transient`.
    pub max_transient_retries: u32,
}

impl Default for AdapterPolicy {
    fn default() -> Self {
        Self::from(&AdapterConfig::default())
    }
}

impl From<&AdapterConfig> for AdapterPolicy {
    fn from(config: &AdapterConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_transient_retries: config.max_transient_retries,
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn policy(&self) -> AdapterPolicy {
        AdapterPolicy::default()
    }

    /// Look up a single organization. `Ok(None)` means the provider has no
    /// match for the query.
    async fn fetch_signal(&self, query: &SignalQuery) -> Result<Option<Signal>, AdapterError>;

    /// Records changed since the given time (everything when `None`).
    async fn pull_updates(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>, AdapterError>;

    /// Organizations showing new activity since the given time.
    async fn discover(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Signal>, AdapterError> {
        self.pull_updates(since).await
    }
}
