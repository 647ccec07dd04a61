//! In-memory repositories
//!
//! Used by tests and by local runs without a database. Both stores can be
//! switched into a failing mode to exercise error paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{OrganizationRepository, ScheduleStore};
use crate::domain::normalize_domain;
use crate::error::RepositoryError;
use crate::models::{OrganizationRecord, SyncSchedule};

#[derive(Debug, Default)]
pub struct InMemoryOrganizationRepository {
    records: Mutex<BTreeMap<String, OrganizationRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryOrganizationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `upsert` fail with `RepositoryError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, OrganizationRecord>> {
        self.records.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl OrganizationRepository for InMemoryOrganizationRepository {
    async fn find_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<OrganizationRecord>, RepositoryError> {
        let domain = normalize_domain(domain)?;
        Ok(self.lock().get(&domain).cloned())
    }

    async fn upsert(
        &self,
        mut record: OrganizationRecord,
    ) -> Result<OrganizationRecord, RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable {
                message: "writes disabled".to_string(),
            });
        }

        record.domain = normalize_domain(&record.domain)?;
        let mut records = self.lock();
        if let Some(stored) = records.get(&record.domain) {
            record.id = stored.id;
            record.first_seen = record.first_seen.min(stored.first_seen);
        }
        records.insert(record.domain.clone(), record.clone());
        Ok(record)
    }

    async fn list(&self, limit: usize) -> Result<Vec<OrganizationRecord>, RepositoryError> {
        let mut records: Vec<OrganizationRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| b.score().cmp(&a.score()).then_with(|| a.domain.cmp(&b.domain)));
        records.truncate(limit);
        Ok(records)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: Mutex<BTreeMap<String, SyncSchedule>>,
    fail_writes: AtomicBool,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, as if schedules had been persisted by a previous run.
    pub fn with_schedules(schedules: impl IntoIterator<Item = SyncSchedule>) -> Self {
        let store = Self::default();
        {
            let mut map = store.lock();
            for schedule in schedules {
                map.insert(schedule.provider_id.clone(), schedule);
            }
        }
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, provider_id: &str) -> Option<SyncSchedule> {
        self.lock().get(provider_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SyncSchedule>> {
        self.schedules.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable {
                message: "writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn load_all(&self) -> Result<BTreeMap<String, SyncSchedule>, RepositoryError> {
        Ok(self.lock().clone())
    }

    async fn save(&self, schedule: &SyncSchedule) -> Result<(), RepositoryError> {
        self.check_writable()?;
        self.lock()
            .insert(schedule.provider_id.clone(), schedule.clone());
        Ok(())
    }

    async fn remove(&self, provider_id: &str) -> Result<bool, RepositoryError> {
        self.check_writable()?;
        Ok(self.lock().remove(provider_id).is_some())
    }
}
