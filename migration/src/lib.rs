//! Database migrations for the lead enrichment engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_organizations;
mod m2025_06_01_000002_create_sync_schedules;
mod m2025_06_20_000003_add_organization_provenance;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_organizations::Migration),
            Box::new(m2025_06_01_000002_create_sync_schedules::Migration),
            Box::new(m2025_06_20_000003_add_organization_provenance::Migration),
        ]
    }
}
