//! Rate-limit backoff
//!
//! Exponential backoff from the rate-limit policy (with per-provider
//! overrides), a provider-supplied `Retry-After` taking precedence when it is
//! longer, plus proportional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RateLimitPolicyConfig;

/// Backoff after `strikes` consecutive rate-limited runs (0 for the first).
pub fn rate_limit_backoff<R: Rng + ?Sized>(
    policy: &RateLimitPolicyConfig,
    provider_id: &str,
    strikes: u32,
    retry_after_secs: Option<u64>,
    rng: &mut R,
) -> Duration {
    let overrides = policy.provider_overrides.get(provider_id);

    let base_seconds = overrides
        .and_then(|o| o.base_seconds)
        .unwrap_or(policy.base_seconds) as f64;
    let max_seconds = overrides
        .and_then(|o| o.max_seconds)
        .unwrap_or(policy.max_seconds) as f64;
    let jitter_factor = overrides
        .and_then(|o| o.jitter_factor)
        .unwrap_or(policy.jitter_factor);

    let exponent = i32::try_from(strikes).unwrap_or(i32::MAX);
    let mut backoff = (base_seconds * 2_f64.powi(exponent)).min(max_seconds);
    if let Some(retry_after) = retry_after_secs {
        backoff = backoff.max(retry_after as f64);
    }

    let jitter_ceiling = jitter_factor * backoff;
    let jitter = if jitter_ceiling > 0.0 {
        rng.gen_range(0.0..jitter_ceiling)
    } else {
        0.0
    };

    Duration::from_secs_f64(backoff + jitter)
}
