//! Provider registry
//!
//! Holds the adapters available to the engine together with their metadata
//! and connection state. Shared behind an `Arc` by the aggregator, the
//! scheduler and the discovery poller.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use super::{ProviderAdapter, ProviderMetadata};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{id}' not found")]
    ProviderNotFound { id: String },
}

struct ProviderEntry {
    adapter: Arc<dyn ProviderAdapter>,
    metadata: ProviderMetadata,
    connected: bool,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<BTreeMap<String, ProviderEntry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ProviderEntry>> {
        self.entries.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ProviderEntry>> {
        self.entries.write().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Register (or replace) a provider. Newly registered providers are
    /// connected.
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>, metadata: ProviderMetadata) {
        let id = metadata.id.clone();
        if adapter.provider_id() != id {
            warn!(
                provider = %id,
                adapter_id = %adapter.provider_id(),
                "adapter id differs from registered provider id"
            );
        }
        info!(provider = %id, kind = %metadata.kind, "registered provider");
        self.write().insert(
            id,
            ProviderEntry {
                adapter,
                metadata,
                connected: true,
            },
        );
    }

    pub fn remove(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Get an adapter by provider id
    pub fn get(&self, id: &str) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.read()
            .get(id)
            .map(|entry| Arc::clone(&entry.adapter))
            .ok_or_else(|| RegistryError::ProviderNotFound { id: id.to_string() })
    }

    pub fn metadata(&self, id: &str) -> Result<ProviderMetadata, RegistryError> {
        self.read()
            .get(id)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| RegistryError::ProviderNotFound { id: id.to_string() })
    }

    /// Metadata for all providers, sorted by id
    pub fn list_metadata(&self) -> Vec<ProviderMetadata> {
        self.read().values().map(|e| e.metadata.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.read().get(id).is_some_and(|e| e.connected)
    }

    pub fn mark_connected(&self, id: &str) -> Result<(), RegistryError> {
        self.set_connected(id, true)
    }

    pub fn mark_disconnected(&self, id: &str) -> Result<(), RegistryError> {
        self.set_connected(id, false)
    }

    fn set_connected(&self, id: &str, connected: bool) -> Result<(), RegistryError> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::ProviderNotFound { id: id.to_string() })?;
        if entry.connected != connected {
            info!(provider = %id, connected, "provider connection state changed");
        }
        entry.connected = connected;
        Ok(())
    }

    /// Connected adapters, ordered by provider id.
    pub fn connected_adapters(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.read()
            .values()
            .filter(|e| e.connected)
            .map(|e| Arc::clone(&e.adapter))
            .collect()
    }

    /// Connected adapters flagged for discovery, ordered by provider id.
    pub fn discovery_adapters(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.read()
            .values()
            .filter(|e| e.connected && e.metadata.discovery)
            .map(|e| Arc::clone(&e.adapter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ProviderKind, ScriptedAdapter};

    fn registry() -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        for (id, kind) in [
            ("web", ProviderKind::Analytics),
            ("crm", ProviderKind::Crm),
            ("ads", ProviderKind::Ads),
        ] {
            registry.register(
                Arc::new(ScriptedAdapter::new(id, kind)),
                ProviderMetadata::new(id, kind),
            );
        }
        registry
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let registry = registry();
        assert_eq!(
            registry.get("nope").err(),
            Some(RegistryError::ProviderNotFound { id: "nope".into() })
        );
        assert!(registry.mark_disconnected("nope").is_err());
    }

    #[test]
    fn disconnected_providers_are_excluded() {
        let registry = registry();
        registry.mark_disconnected("web").unwrap();

        let connected: Vec<String> = registry
            .connected_adapters()
            .iter()
            .map(|a| a.provider_id().to_string())
            .collect();
        assert_eq!(connected, vec!["ads", "crm"]);

        let discovery: Vec<String> = registry
            .discovery_adapters()
            .iter()
            .map(|a| a.provider_id().to_string())
            .collect();
        assert_eq!(discovery, vec!["ads"]);

        registry.mark_connected("web").unwrap();
        assert!(registry.is_connected("web"));
    }

    #[test]
    fn metadata_is_listed_in_id_order() {
        let ids: Vec<String> = registry().list_metadata().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["ads", "crm", "web"]);
    }
}
