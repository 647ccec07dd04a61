//! Discovery events delivered to listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::organization::OrganizationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryEventType {
    NewLead,
    LeadUpdated,
    HighValueActivity,
}

impl DiscoveryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryEventType::NewLead => "new_lead",
            DiscoveryEventType::LeadUpdated => "lead_updated",
            DiscoveryEventType::HighValueActivity => "high_value_activity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    pub event_type: DiscoveryEventType,
    pub organization: OrganizationRecord,
    pub source_provider: String,
    pub timestamp: DateTime<Utc>,
    /// Confidence the source provider reported for the triggering signal.
    pub confidence: f64,
    pub reasons: Vec<String>,
}
