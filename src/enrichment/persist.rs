//! Signal persistence shared by sync and discovery.

use tracing::debug;

use super::merge::{fold_signals, merge_into, merge_records};
use crate::domain::normalize_domain;
use crate::error::RepositoryError;
use crate::models::{OrganizationRecord, Signal};
use crate::repositories::OrganizationRepository;
use crate::scoring::LeadScorer;

/// Whether an upsert created a lead or updated a known one.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Added(OrganizationRecord),
    Updated(OrganizationRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &OrganizationRecord {
        match self {
            Self::Added(record) | Self::Updated(record) => record,
        }
    }

    pub fn into_record(self) -> OrganizationRecord {
        match self {
            Self::Added(record) | Self::Updated(record) => record,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// Merge one signal into the stored record for its domain (creating the
/// record when none exists), re-score it and write it back.
pub async fn upsert_signal(
    repository: &dyn OrganizationRepository,
    scorer: &LeadScorer,
    signal: Signal,
) -> Result<UpsertOutcome, RepositoryError> {
    let domain = normalize_domain(&signal.domain)?;
    let signal = Signal { domain, ..signal };
    let now = scorer.now();

    let existing = repository.find_by_domain(&signal.domain).await?;
    let (mut record, added) = match &existing {
        Some(stored) => (merge_into(stored, std::slice::from_ref(&signal), now), false),
        None => (fold_signals(&signal.domain, std::slice::from_ref(&signal), now), true),
    };
    scorer.apply(&mut record);

    let stored = repository.upsert(record).await?;
    debug!(
        domain = %stored.domain,
        source = %signal.source_id,
        added,
        score = stored.score(),
        "lead persisted"
    );

    Ok(if added {
        UpsertOutcome::Added(stored)
    } else {
        UpsertOutcome::Updated(stored)
    })
}

/// Persist an enriched record, merging it into the stored one when the
/// domain is already known. `source_id` names the enrichment in the merge.
pub async fn upsert_record(
    repository: &dyn OrganizationRepository,
    scorer: &LeadScorer,
    record: OrganizationRecord,
    source_id: &str,
) -> Result<UpsertOutcome, RepositoryError> {
    let domain = normalize_domain(&record.domain)?;
    let record = OrganizationRecord {
        id: OrganizationRecord::id_for_domain(&domain),
        domain,
        ..record
    };

    let (mut record, added) = match repository.find_by_domain(&record.domain).await? {
        Some(stored) => (merge_records(&stored, &record, source_id, scorer.now()), false),
        None => (record, true),
    };
    scorer.apply(&mut record);

    let stored = repository.upsert(record).await?;
    debug!(domain = %stored.domain, source = %source_id, added, "enriched lead persisted");
    Ok(if added {
        UpsertOutcome::Added(stored)
    } else {
        UpsertOutcome::Updated(stored)
    })
}
