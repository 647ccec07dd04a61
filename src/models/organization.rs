//! Organization entity model
//!
//! `OrganizationRecord` is the canonical merged view of a company, keyed by
//! its normalized domain. The SeaORM `Model` below is its row in the
//! `organizations` table.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;

/// Lead temperature derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Hot,
    Warm,
    Cold,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Hot => "hot",
            LeadStatus::Warm => "warm",
            LeadStatus::Cold => "cold",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hot" => Ok(LeadStatus::Hot),
            "warm" => Ok(LeadStatus::Warm),
            "cold" => Ok(LeadStatus::Cold),
            other => Err(format!("unknown lead status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub country: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        is_blank(self.city.as_deref()) && is_blank(self.country.as_deref())
    }
}

/// Behavioral engagement aggregated across providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementSignals {
    pub max_page_depth: u32,
    pub form_submissions: u32,
    pub pricing_page_visits: u32,
}

impl EngagementSignals {
    pub fn is_empty(&self) -> bool {
        *self == EngagementSignals::default()
    }

    /// Element-wise maximum; engagement counters never decrease on merge.
    pub fn absorb(&mut self, other: &EngagementSignals) {
        self.max_page_depth = self.max_page_depth.max(other.max_page_depth);
        self.form_submissions = self.form_submissions.max(other.form_submissions);
        self.pricing_page_visits = self.pricing_page_visits.max(other.pricing_page_visits);
    }
}

/// The signal whose value won a merged attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    pub source_id: String,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
}

/// Per-attribute winners and the confidence tally behind a merged record.
///
/// A stored record re-enters later merges through this, so each attribute
/// keeps the rank of the signal that supplied it and the record confidence
/// stays the mean over every contributing signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<FieldSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<FieldSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<FieldSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FieldSource>,
    /// Signals that supplied at least one value.
    #[serde(default)]
    pub signal_count: u32,
    #[serde(default)]
    pub confidence_sum: f64,
}

/// Canonical merged view of an organization.
///
/// `score` and `status` are derived by the scoring engine; they are only
/// readable from outside the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub id: Uuid,
    pub domain: String,
    pub name: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub location: Option<Location>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_visits: u64,
    pub engagement: EngagementSignals,
    pub(crate) score: u8,
    pub(crate) status: LeadStatus,
    pub tags: BTreeSet<String>,
    pub confidence: f64,
    #[serde(default)]
    pub provenance: Provenance,
}

impl OrganizationRecord {
    /// Stable identifier for a normalized domain.
    pub fn id_for_domain(domain: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_DNS, domain.as_bytes())
    }

    /// A domain-only record: no attributes, zero confidence, not yet scored.
    pub fn new(domain: impl Into<String>, seen_at: DateTime<Utc>) -> Self {
        let domain = domain.into();
        Self {
            id: Self::id_for_domain(&domain),
            domain,
            name: None,
            industry: None,
            size: None,
            location: None,
            first_seen: seen_at,
            last_seen: seen_at,
            total_visits: 0,
            engagement: EngagementSignals::default(),
            score: 0,
            status: LeadStatus::Cold,
            tags: BTreeSet::new(),
            confidence: 0.0,
            provenance: Provenance::default(),
        }
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn status(&self) -> LeadStatus {
        self.status
    }
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Organization row in the `organizations` table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Normalized domain, unique across the table
    #[sea_orm(unique)]
    pub domain: String,

    pub name: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,

    pub first_seen: DateTimeWithTimeZone,
    pub last_seen: DateTimeWithTimeZone,

    pub total_visits: i64,
    pub max_page_depth: i32,
    pub form_submissions: i32,
    pub pricing_page_visits: i32,

    pub score: i16,
    pub status: String,

    /// JSON array of tag strings
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: JsonValue,

    pub confidence: f64,

    /// JSON object of per-attribute sources; null on rows written before it existed
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub provenance: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Build a fully-populated active model for insert or update.
    pub fn from_record(
        record: &OrganizationRecord,
        id: Uuid,
        created_at: DateTimeWithTimeZone,
        updated_at: DateTimeWithTimeZone,
    ) -> Result<Self, RepositoryError> {
        use sea_orm::Set;

        let location = record.location.clone().unwrap_or_default();
        Ok(Self {
            id: Set(id),
            domain: Set(record.domain.clone()),
            name: Set(record.name.clone()),
            industry: Set(record.industry.clone()),
            size: Set(record.size.clone()),
            city: Set(location.city),
            country: Set(location.country),
            first_seen: Set(record.first_seen.fixed_offset()),
            last_seen: Set(record.last_seen.fixed_offset()),
            total_visits: Set(i64::try_from(record.total_visits).unwrap_or(i64::MAX)),
            max_page_depth: Set(to_i32(record.engagement.max_page_depth)),
            form_submissions: Set(to_i32(record.engagement.form_submissions)),
            pricing_page_visits: Set(to_i32(record.engagement.pricing_page_visits)),
            score: Set(i16::from(record.score)),
            status: Set(record.status.as_str().to_string()),
            tags: Set(serde_json::to_value(&record.tags)?),
            confidence: Set(record.confidence),
            provenance: Set(Some(serde_json::to_value(&record.provenance)?)),
            created_at: Set(created_at),
            updated_at: Set(updated_at),
        })
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl TryFrom<Model> for OrganizationRecord {
    type Error = RepositoryError;

    fn try_from(row: Model) -> Result<Self, Self::Error> {
        let status = LeadStatus::from_str(&row.status)
            .map_err(|message| RepositoryError::Corrupt { message })?;
        let tags: BTreeSet<String> = serde_json::from_value(row.tags)?;
        let provenance = match row.provenance {
            Some(value) => serde_json::from_value(value)?,
            None => Provenance::default(),
        };
        let location = Location {
            city: row.city,
            country: row.country,
        };

        Ok(OrganizationRecord {
            id: row.id,
            domain: row.domain,
            name: row.name,
            industry: row.industry,
            size: row.size,
            location: (!location.is_empty()).then_some(location),
            first_seen: row.first_seen.with_timezone(&Utc),
            last_seen: row.last_seen.with_timezone(&Utc),
            total_visits: u64::try_from(row.total_visits).unwrap_or(0),
            engagement: EngagementSignals {
                max_page_depth: to_u32(row.max_page_depth),
                form_submissions: to_u32(row.form_submissions),
                pricing_page_visits: to_u32(row.pricing_page_visits),
            },
            score: u8::try_from(row.score.clamp(0, 100)).unwrap_or(0),
            status,
            tags,
            confidence: row.confidence,
            provenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_domain_only() {
        let now = Utc::now();
        let record = OrganizationRecord::new("acme.com", now);
        assert_eq!(record.id, OrganizationRecord::id_for_domain("acme.com"));
        assert_eq!(record.confidence, 0.0);
        assert_eq!(record.status(), LeadStatus::Cold);
        assert!(record.name.is_none());
        assert_eq!(record.first_seen, record.last_seen);
    }

    #[test]
    fn engagement_absorb_takes_maximum() {
        let mut current = EngagementSignals {
            max_page_depth: 3,
            form_submissions: 2,
            pricing_page_visits: 0,
        };
        current.absorb(&EngagementSignals {
            max_page_depth: 1,
            form_submissions: 5,
            pricing_page_visits: 1,
        });
        assert_eq!(
            current,
            EngagementSignals {
                max_page_depth: 3,
                form_submissions: 5,
                pricing_page_visits: 1,
            }
        );
    }

    #[test]
    fn row_round_trips_through_active_model_fields() {
        let now = Utc::now();
        let mut record = OrganizationRecord::new("acme.com", now);
        record.name = Some("Acme".into());
        record.location = Some(Location {
            city: None,
            country: Some("DE".into()),
        });
        record.tags.insert("pricing-visitor".into());
        record.score = 72;
        record.status = LeadStatus::Warm;

        let row = Model {
            id: record.id,
            domain: record.domain.clone(),
            name: record.name.clone(),
            industry: None,
            size: None,
            city: None,
            country: Some("DE".into()),
            first_seen: now.fixed_offset(),
            last_seen: now.fixed_offset(),
            total_visits: 0,
            max_page_depth: 0,
            form_submissions: 0,
            pricing_page_visits: 0,
            score: 72,
            status: "warm".into(),
            tags: serde_json::json!(["pricing-visitor"]),
            confidence: 0.0,
            provenance: None,
            created_at: now.fixed_offset(),
            updated_at: now.fixed_offset(),
        };

        let restored = OrganizationRecord::try_from(row).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        let now = Utc::now().fixed_offset();
        let row = Model {
            id: Uuid::new_v4(),
            domain: "acme.com".into(),
            name: None,
            industry: None,
            size: None,
            city: None,
            country: None,
            first_seen: now,
            last_seen: now,
            total_visits: 0,
            max_page_depth: 0,
            form_submissions: 0,
            pricing_page_visits: 0,
            score: 0,
            status: "lukewarm".into(),
            tags: serde_json::json!([]),
            confidence: 0.0,
            provenance: Some(serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            OrganizationRecord::try_from(row),
            Err(RepositoryError::Corrupt { .. })
        ));
    }
}
