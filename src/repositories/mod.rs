//! # Repository Layer
//!
//! Storage seams for organizations and sync schedules. The engine only sees
//! the `OrganizationRepository` and `ScheduleStore` traits; in-memory
//! implementations back tests and local runs, SeaORM implementations back
//! SQLite/Postgres deployments.

pub mod memory;
pub mod organization;
pub mod sync_schedule;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::models::{OrganizationRecord, SyncSchedule};

pub use memory::{InMemoryOrganizationRepository, InMemoryScheduleStore};
pub use organization::SeaOrmOrganizationRepository;
pub use sync_schedule::SeaOrmScheduleStore;

/// Organization storage keyed by normalized domain.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Look up a record; `domain` is normalized before the lookup.
    async fn find_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<OrganizationRecord>, RepositoryError>;

    /// Insert or replace the record for `record.domain`.
    ///
    /// The domain is normalized first. When a record already exists for it,
    /// the stored id and `first_seen` are kept. Returns the stored record.
    async fn upsert(&self, record: OrganizationRecord) -> Result<OrganizationRecord, RepositoryError>;

    /// Records ordered by score (highest first), then domain.
    async fn list(&self, limit: usize) -> Result<Vec<OrganizationRecord>, RepositoryError>;
}

/// Persisted sync schedules, one per provider.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn load_all(&self) -> Result<BTreeMap<String, SyncSchedule>, RepositoryError>;

    async fn save(&self, schedule: &SyncSchedule) -> Result<(), RepositoryError>;

    /// Returns whether a schedule was stored for the provider.
    async fn remove(&self, provider_id: &str) -> Result<bool, RepositoryError>;
}
