//! Domain normalization.
//!
//! The normalized domain is the de-duplication key for organizations: every
//! adapter, aggregation and persistence path resolves to it first.

use url::Url;

use crate::error::DomainError;

/// Normalize a user- or provider-supplied domain into the canonical key.
///
/// Accepts bare hosts, URLs with `http://`/`https://` schemes, paths, ports
/// and e-mail addresses. The result is lowercase, scheme-less, without a
/// leading `www.` and without a trailing dot.
pub fn normalize_domain(input: &str) -> Result<String, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }

    let lowered = trimmed.to_ascii_lowercase();
    let candidate = if lowered.contains("://") {
        lowered
    } else {
        format!("http://{lowered}")
    };

    let invalid = || DomainError::Invalid {
        input: input.to_string(),
    };

    let url = Url::parse(&candidate).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    if host.is_empty() || !host.contains('.') {
        return Err(invalid());
    }

    Ok(host.to_string())
}
