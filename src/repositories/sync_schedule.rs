//! Sync schedule store backed by the `sync_schedules` table.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, TransactionTrait};

use super::ScheduleStore;
use crate::clock::Clock;
use crate::error::RepositoryError;
use crate::models::SyncSchedule;
use crate::models::sync_schedule::{self, Entity as SyncScheduleEntity};

#[derive(Debug, Clone)]
pub struct SeaOrmScheduleStore {
    db: Arc<DatabaseConnection>,
    clock: Arc<dyn Clock>,
}

impl SeaOrmScheduleStore {
    pub fn new(db: Arc<DatabaseConnection>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl ScheduleStore for SeaOrmScheduleStore {
    async fn load_all(&self) -> Result<BTreeMap<String, SyncSchedule>, RepositoryError> {
        let rows = SyncScheduleEntity::find().all(self.db.as_ref()).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.provider_id.clone(), SyncSchedule::from(row)))
            .collect())
    }

    async fn save(&self, schedule: &SyncSchedule) -> Result<(), RepositoryError> {
        let model =
            sync_schedule::ActiveModel::from_schedule(schedule, self.clock.now().fixed_offset());

        let txn = self.db.begin().await?;
        let exists = SyncScheduleEntity::find_by_id(schedule.provider_id.clone())
            .one(&txn)
            .await?
            .is_some();
        if exists {
            model.update(&txn).await?;
        } else {
            SyncScheduleEntity::insert(model)
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn remove(&self, provider_id: &str) -> Result<bool, RepositoryError> {
        let result = SyncScheduleEntity::delete_by_id(provider_id.to_string())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }
}
