//! Organization repository for database operations
//!
//! Stores merged lead records in the `organizations` table. The domain
//! column is unique; upserts run inside a transaction and keep the id of
//! an existing row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};

use super::OrganizationRepository;
use crate::clock::Clock;
use crate::domain::normalize_domain;
use crate::error::RepositoryError;
use crate::models::OrganizationRecord;
use crate::models::organization::{self, Entity as Organization};

/// Repository for organization database operations
#[derive(Debug, Clone)]
pub struct SeaOrmOrganizationRepository {
    db: Arc<DatabaseConnection>,
    clock: Arc<dyn Clock>,
}

impl SeaOrmOrganizationRepository {
    pub fn new(db: Arc<DatabaseConnection>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl OrganizationRepository for SeaOrmOrganizationRepository {
    async fn find_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<OrganizationRecord>, RepositoryError> {
        let domain = normalize_domain(domain)?;
        Organization::find()
            .filter(organization::Column::Domain.eq(domain))
            .one(self.db.as_ref())
            .await?
            .map(OrganizationRecord::try_from)
            .transpose()
    }

    async fn upsert(
        &self,
        mut record: OrganizationRecord,
    ) -> Result<OrganizationRecord, RepositoryError> {
        record.domain = normalize_domain(&record.domain)?;
        let now = self.clock.now().fixed_offset();

        let txn = self.db.begin().await?;
        let existing = Organization::find()
            .filter(organization::Column::Domain.eq(record.domain.as_str()))
            .one(&txn)
            .await?;

        match existing {
            Some(row) => {
                record.id = row.id;
                record.first_seen = record.first_seen.min(row.first_seen.with_timezone(&Utc));
                organization::ActiveModel::from_record(&record, row.id, row.created_at, now)?
                    .update(&txn)
                    .await?;
            }
            None => {
                let model = organization::ActiveModel::from_record(&record, record.id, now, now)?;
                Organization::insert(model).exec_without_returning(&txn).await?;
            }
        }
        txn.commit().await?;

        tracing::debug!(domain = %record.domain, id = %record.id, "organization upserted");
        Ok(record)
    }

    async fn list(&self, limit: usize) -> Result<Vec<OrganizationRecord>, RepositoryError> {
        Organization::find()
            .order_by_desc(organization::Column::Score)
            .order_by_asc(organization::Column::Domain)
            .limit(u64::try_from(limit).unwrap_or(u64::MAX))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(OrganizationRecord::try_from)
            .collect()
    }
}
