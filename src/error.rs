//! # Error Handling
//!
//! Typed failures for every layer of the engine. Adapter failures are
//! classified once at the edge so the aggregator, the scheduler and the
//! discovery poller can all react to the same taxonomy.

use thiserror::Error;

/// Failure returned by a provider adapter call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The call did not finish within the adapter's timeout.
    #[error("provider {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },
    /// Credentials were rejected (401/403 or equivalent).
    #[error("provider {provider} rejected credentials: {message}")]
    Auth { provider: String, message: String },
    /// The provider asked us to slow down.
    #[error("provider {provider} rate limited the request (retry after: {retry_after_secs:?}s)")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },
    /// Network failures and 5xx responses; safe to retry.
    #[error("provider {provider} transient failure: {message}")]
    Transient { provider: String, message: String },
    /// The request can never succeed as issued.
    #[error("provider {provider} permanent failure: {message}")]
    Permanent { provider: String, message: String },
    /// The provider answered with a payload we could not interpret.
    #[error("provider {provider} returned a malformed response: {message}")]
    Malformed { provider: String, message: String },
}

impl AdapterError {
    pub fn auth<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited<P: Into<String>>(provider: P, retry_after_secs: Option<u64>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after_secs,
        }
    }

    pub fn transient<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn permanent<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Permanent {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Malformed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 404 is not an error at all (it means "no match") and is handled by
    /// the caller before reaching this point.
    pub fn from_status(
        provider: &str,
        status: u16,
        retry_after_secs: Option<u64>,
        body: &str,
    ) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 256))
        };
        match status {
            401 | 403 => Self::auth(provider, message),
            429 => Self::rate_limited(provider, retry_after_secs),
            500..=599 => Self::transient(provider, message),
            _ => Self::permanent(provider, message),
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Auth { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Permanent { provider, .. }
            | Self::Malformed { provider, .. } => provider,
        }
    }

    /// Whether an immediate, bounded retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::Malformed { .. } => "malformed",
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Domain normalization failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain is empty")]
    Empty,
    #[error("'{input}' is not a valid domain")]
    Invalid { input: String },
}

/// Enrichment request failure. Adapter failures never surface here; they
/// are reported per provider inside the enrichment result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    InvalidDomain(#[from] DomainError),
}

/// Persistence failure for organizations and sync schedules.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored row is corrupt: {message}")]
    Corrupt { message: String },
    #[error("repository unavailable: {message}")]
    Unavailable { message: String },
    #[error(transparent)]
    InvalidDomain(#[from] DomainError),
}

/// Scheduler operation failure.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("provider '{provider_id}' is not registered")]
    UnknownProvider { provider_id: String },
    #[error("sync interval must be between {min} and {max} minutes, got {minutes}")]
    InvalidInterval { minutes: u32, min: u32, max: u32 },
    #[error("a sync for provider '{provider_id}' is already running")]
    AlreadyRunning { provider_id: String },
    #[error("failed to persist schedule: {0}")]
    Store(#[from] RepositoryError),
}

/// Discovery poller failure.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery poller is already running")]
    AlreadyRunning,
    #[error("discovery is disabled by configuration")]
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            AdapterError::from_status("crm", 401, None, ""),
            AdapterError::Auth { .. }
        ));
        assert!(matches!(
            AdapterError::from_status("crm", 403, None, "forbidden"),
            AdapterError::Auth { .. }
        ));
        assert_eq!(
            AdapterError::from_status("crm", 429, Some(30), ""),
            AdapterError::rate_limited("crm", Some(30))
        );
        assert!(AdapterError::from_status("crm", 503, None, "").is_transient());
        assert!(matches!(
            AdapterError::from_status("crm", 422, None, "bad filter"),
            AdapterError::Permanent { .. }
        ));
    }

    #[test]
    fn long_bodies_are_truncated_in_messages() {
        let body = "x".repeat(1_000);
        let err = AdapterError::from_status("ads", 500, None, &body);
        match err {
            AdapterError::Transient { message, .. } => assert!(message.len() < 300),
            other => panic!("unexpected {other:?}"),
        }
    }
}
