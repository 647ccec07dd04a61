//! Timeout and retry wrapper around adapter calls.

use std::future::Future;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, warn};

use super::ProviderAdapter;
use super::trait_::AdapterPolicy;
use crate::error::AdapterError;
use crate::models::{Signal, SignalQuery};

/// Single-organization fetch under the adapter's policy.
pub async fn invoke_fetch(
    adapter: &dyn ProviderAdapter,
    query: &SignalQuery,
) -> Result<Option<Signal>, AdapterError> {
    call_with_policy(adapter.provider_id(), "fetch_signal", adapter.policy(), || {
        adapter.fetch_signal(query)
    })
    .await
}

/// Incremental pull under the adapter's policy.
pub async fn invoke_pull(
    adapter: &dyn ProviderAdapter,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Signal>, AdapterError> {
    call_with_policy(adapter.provider_id(), "pull_updates", adapter.policy(), || {
        adapter.pull_updates(since)
    })
    .await
}

/// Discovery query under the adapter's policy.
pub async fn invoke_discover(
    adapter: &dyn ProviderAdapter,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Signal>, AdapterError> {
    call_with_policy(adapter.provider_id(), "discover", adapter.policy(), || {
        adapter.discover(since)
    })
    .await
}

async fn call_with_policy<T, F, Fut>(
    provider: &str,
    operation: &'static str,
    policy: AdapterPolicy,
    mut call: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                provider: provider.to_string(),
                timeout_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Err(err) if err.is_transient() && attempt < policy.max_transient_retries => {
                attempt += 1;
                warn!(
                    provider = %provider,
                    operation,
                    attempt,
                    max_retries = policy.max_transient_retries,
                    error = %err,
                    "transient adapter failure, retrying"
                );
                counter!(
                    "lead_adapter_retries_total",
                    "provider" => provider.to_string(),
                    "operation" => operation
                )
                .increment(1);
            }
            Err(err) => {
                debug!(provider = %provider, operation, kind = err.kind_label(), "adapter call failed");
                return Err(err);
            }
            Ok(value) => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::{FailureKind, ProviderKind, ScriptStep, ScriptedAdapter};
    use crate::models::SignalFields;

    fn policy(retries: u32) -> AdapterPolicy {
        AdapterPolicy {
            timeout: Duration::from_secs(2),
            max_transient_retries: retries,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_adapter_times_out() {
        let adapter = ScriptedAdapter::new("web", ProviderKind::Analytics)
            .with_policy(policy(0))
            .on_fetch(ScriptStep::Hang);

        let err = invoke_fetch(&adapter, &SignalQuery::for_domain("acme.com"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::Timeout {
                provider: "web".into(),
                timeout_ms: 2000
            }
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_up_to_the_cap() {
        let adapter = ScriptedAdapter::new("web", ProviderKind::Analytics)
            .with_policy(policy(2))
            .on_fetch(ScriptStep::Fail(FailureKind::Transient))
            .on_fetch(ScriptStep::Fail(FailureKind::Transient))
            .on_fetch(ScriptStep::Respond {
                fields: SignalFields {
                    name: Some("Acme".into()),
                    ..SignalFields::default()
                },
                confidence: 0.8,
            });

        let signal = invoke_fetch(&adapter, &SignalQuery::for_domain("acme.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.fields.name.as_deref(), Some("Acme"));
        assert_eq!(adapter.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn retries_stop_after_the_cap() {
        let adapter = ScriptedAdapter::new("web", ProviderKind::Analytics)
            .with_policy(policy(1))
            .on_fetch(ScriptStep::Fail(FailureKind::Transient));

        let err = invoke_fetch(&adapter, &SignalQuery::for_domain("acme.com"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(adapter.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn auth_and_rate_limit_are_not_retried() {
        for failure in [FailureKind::Auth, FailureKind::RateLimited(Some(60))] {
            let adapter = ScriptedAdapter::new("crm", ProviderKind::Crm)
                .with_policy(policy(3))
                .on_pull(ScriptStep::Fail(failure));

            assert!(invoke_pull(&adapter, None).await.is_err());
            assert_eq!(adapter.pull_calls(), 1);
        }
    }
}
