//! Migration to create the sync_schedules table.
//!
//! Flat per-provider schedule state, keyed by provider id, so active
//! schedules can be re-armed after a restart.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncSchedules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncSchedules::ProviderId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncSchedules::IntervalMinutes)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncSchedules::IsActive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncSchedules::LastRun)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncSchedules::NextRun)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncSchedules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncSchedules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncSchedules {
    Table,
    ProviderId,
    IntervalMinutes,
    IsActive,
    LastRun,
    NextRun,
    UpdatedAt,
}
