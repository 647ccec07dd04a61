//! Provider signals
//!
//! A `Signal` is one provider's partial view of an organization at a point
//! in time. Signals are merged into `OrganizationRecord`s by the enrichment
//! layer.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::organization::{EngagementSignals, Location, is_blank};

/// Partial organization attributes reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalFields {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub location: Option<Location>,
    pub total_visits: Option<u64>,
    pub engagement: Option<EngagementSignals>,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl SignalFields {
    /// Whether this signal supplies at least one non-empty attribute.
    pub fn supplies_any(&self) -> bool {
        !is_blank(self.name.as_deref())
            || !is_blank(self.industry.as_deref())
            || !is_blank(self.size.as_deref())
            || self.location.as_ref().is_some_and(|l| !l.is_empty())
            || self.total_visits.is_some()
            || self.engagement.is_some_and(|e| !e.is_empty())
            || self.last_seen.is_some()
            || !self.tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source_id: String,
    pub domain: String,
    pub fields: SignalFields,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
}

impl Signal {
    /// Build a signal; confidence is clamped to `[0, 1]` (NaN becomes 0).
    pub fn new(
        source_id: impl Into<String>,
        domain: impl Into<String>,
        fields: SignalFields,
        confidence: f64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            domain: domain.into(),
            fields,
            confidence: clamp_confidence(confidence),
            captured_at,
        }
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Lookup key for a single-organization fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalQuery {
    pub domain: String,
    pub ip_address: Option<IpAddr>,
}

impl SignalQuery {
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ip_address: None,
        }
    }
}
