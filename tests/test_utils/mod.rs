//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite databases with migrations applied, scripted provider
//! registration and signal fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use leadintel::adapters::{ProviderAdapter, ProviderMetadata, ProviderRegistry, ScriptedAdapter};
use leadintel::models::{EngagementSignals, Signal, SignalFields};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Same as [`setup_test_db`], wrapped in an `Arc` for the repositories.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Fixed reference time used across tests.
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-10T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Register a scripted adapter and keep a handle for call-count assertions.
pub fn register(registry: &ProviderRegistry, adapter: ScriptedAdapter) -> Arc<ScriptedAdapter> {
    let metadata = ProviderMetadata::new(adapter.provider_id().to_string(), adapter.kind());
    register_with(registry, adapter, metadata)
}

pub fn register_with(
    registry: &ProviderRegistry,
    adapter: ScriptedAdapter,
    metadata: ProviderMetadata,
) -> Arc<ScriptedAdapter> {
    let adapter = Arc::new(adapter);
    registry.register(adapter.clone(), metadata);
    adapter
}

pub fn signal(source: &str, domain: &str, fields: SignalFields, confidence: f64) -> Signal {
    Signal::new(source, domain, fields, confidence, fixed_now())
}

pub fn visits(total_visits: u64) -> SignalFields {
    SignalFields {
        total_visits: Some(total_visits),
        ..SignalFields::default()
    }
}

pub fn engagement(pricing_page_visits: u32, form_submissions: u32, max_page_depth: u32) -> SignalFields {
    SignalFields {
        engagement: Some(EngagementSignals {
            max_page_depth,
            form_submissions,
            pricing_page_visits,
        }),
        ..SignalFields::default()
    }
}
