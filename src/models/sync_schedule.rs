//! SyncSchedule entity model
//!
//! One schedule per provider. Persisted in `sync_schedules` so enabled
//! providers resume their cadence after a restart.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSchedule {
    pub provider_id: String,
    pub interval_minutes: u32,
    pub is_active: bool,
    /// Finish time of the last successful sync.
    pub last_run: Option<DateTime<Utc>>,
    /// Planned time of the next timer-driven sync; `None` while inactive.
    pub next_run: Option<DateTime<Utc>>,
}

impl SyncSchedule {
    pub fn inactive(provider_id: impl Into<String>, interval_minutes: u32) -> Self {
        Self {
            provider_id: provider_id.into(),
            interval_minutes,
            is_active: false,
            last_run: None,
            next_run: None,
        }
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.interval_minutes))
    }
}

/// Row in the `sync_schedules` table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_schedules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider_id: String,
    pub interval_minutes: i32,
    pub is_active: bool,
    pub last_run: Option<DateTimeWithTimeZone>,
    pub next_run: Option<DateTimeWithTimeZone>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for SyncSchedule {
    fn from(row: Model) -> Self {
        Self {
            provider_id: row.provider_id,
            interval_minutes: u32::try_from(row.interval_minutes).unwrap_or(0),
            is_active: row.is_active,
            last_run: row.last_run.map(|ts| ts.with_timezone(&Utc)),
            next_run: row.next_run.map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

impl ActiveModel {
    pub fn from_schedule(schedule: &SyncSchedule, updated_at: DateTimeWithTimeZone) -> Self {
        use sea_orm::Set;

        Self {
            provider_id: Set(schedule.provider_id.clone()),
            interval_minutes: Set(i32::try_from(schedule.interval_minutes).unwrap_or(i32::MAX)),
            is_active: Set(schedule.is_active),
            last_run: Set(schedule.last_run.map(|ts| ts.fixed_offset())),
            next_run: Set(schedule.next_run.map(|ts| ts.fixed_offset())),
            updated_at: Set(updated_at),
        }
    }
}
