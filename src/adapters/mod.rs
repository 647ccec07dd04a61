//! Provider adapters
//!
//! This module provides:
//! - The `ProviderAdapter` trait every data source implements
//! - Policy-enforcing `invoke_*` helpers (timeout + bounded transient retry)
//! - Provider metadata and the connection-aware registry
//! - HTTP adapters for analytics, ads and CRM providers, plus a scripted fake

pub mod ads;
pub mod analytics;
pub mod crm;
pub mod http;
pub mod invoke;
pub mod metadata;
pub mod registry;
pub mod scripted;
pub mod trait_;

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{AppConfig, ProviderCredentials};
use crate::error::AdapterError;

pub use ads::AdsAdapter;
pub use analytics::AnalyticsAdapter;
pub use crm::CrmAdapter;
pub use http::ProviderHttpClient;
pub use invoke::{invoke_discover, invoke_fetch, invoke_pull};
pub use metadata::{ProviderKind, ProviderMetadata};
pub use registry::{ProviderRegistry, RegistryError};
pub use scripted::{FailureKind, ScriptStep, ScriptedAdapter};
pub use trait_::{AdapterPolicy, ProviderAdapter};

/// Build a registry from the `providers` section of the configuration.
///
/// The provider kind comes from the `kind` setting, or from the provider id
/// itself (`analytics`, `ads`, `crm`). Providers with `enabled=false` are
/// skipped; misconfigured ones are logged and skipped.
pub fn build_registry(config: &AppConfig, clock: Arc<dyn Clock>) -> ProviderRegistry {
    let registry = ProviderRegistry::new();
    let policy = AdapterPolicy::from(&config.adapter);

    for (id, credentials) in &config.providers {
        if credentials.parse::<bool>("enabled") == Some(false) {
            info!(provider = %id, "provider disabled by configuration");
            continue;
        }
        match build_adapter(id, credentials, policy, Arc::clone(&clock)) {
            Ok((adapter, kind)) => {
                let mut metadata = ProviderMetadata::new(id.clone(), kind);
                if let Some(minutes) = credentials.parse::<u32>("interval_minutes") {
                    metadata = metadata.with_interval_minutes(minutes);
                }
                if let Some(discovery) = credentials.parse::<bool>("discovery") {
                    metadata = metadata.with_discovery(discovery);
                }
                registry.register(adapter, metadata);
            }
            Err(err) => {
                warn!(provider = %id, error = %err, "provider not registered");
            }
        }
    }

    registry
}

fn build_adapter(
    id: &str,
    credentials: &ProviderCredentials,
    policy: AdapterPolicy,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn ProviderAdapter>, ProviderKind), AdapterError> {
    let kind: ProviderKind = credentials
        .get("kind")
        .unwrap_or(id)
        .parse()
        .map_err(|message: String| AdapterError::permanent(id, message))?;
    let http = ProviderHttpClient::from_credentials(id, credentials, policy.timeout)?;

    let adapter: Arc<dyn ProviderAdapter> = match kind {
        ProviderKind::Analytics => Arc::new(AnalyticsAdapter::new(id, http, policy, clock)),
        ProviderKind::Ads => Arc::new(AdsAdapter::new(id, http, policy, clock)),
        ProviderKind::Crm => {
            let mut adapter = CrmAdapter::new(id, http, policy, clock);
            if let Some(confidence) = credentials.parse::<f64>("confidence") {
                adapter = adapter.with_confidence(confidence);
            }
            Arc::new(adapter)
        }
    };
    Ok((adapter, kind))
}
