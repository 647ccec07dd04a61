//! Migration to create the organizations table.
//!
//! One row per normalized domain holding the merged, scored lead record.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Organizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Organizations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Organizations::Domain)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Organizations::Name).text().null())
                    .col(ColumnDef::new(Organizations::Industry).text().null())
                    .col(ColumnDef::new(Organizations::Size).text().null())
                    .col(ColumnDef::new(Organizations::City).text().null())
                    .col(ColumnDef::new(Organizations::Country).text().null())
                    .col(
                        ColumnDef::new(Organizations::FirstSeen)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Organizations::LastSeen)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Organizations::TotalVisits)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::MaxPageDepth)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::FormSubmissions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::PricingPageVisits)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::Score)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::Status)
                            .text()
                            .not_null()
                            .default("cold"),
                    )
                    .col(ColumnDef::new(Organizations::Tags).json_binary().not_null())
                    .col(
                        ColumnDef::new(Organizations::Confidence)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Organizations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Organizations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Ranking queries read by score, then domain.
        manager
            .create_index(
                Index::create()
                    .name("idx_organizations_score_domain")
                    .table(Organizations::Table)
                    .col(Organizations::Score)
                    .col(Organizations::Domain)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_organizations_score_domain")
                    .table(Organizations::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Organizations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
    Domain,
    Name,
    Industry,
    Size,
    City,
    Country,
    FirstSeen,
    LastSeen,
    TotalVisits,
    MaxPageDepth,
    FormSubmissions,
    PricingPageVisits,
    Score,
    Status,
    Tags,
    Confidence,
    CreatedAt,
    UpdatedAt,
}
