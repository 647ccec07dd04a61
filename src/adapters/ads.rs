//! Ad platform adapter
//!
//! Company-level engagement from an advertising platform: organization
//! profile plus ad click-throughs attributed to the company.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::http::ProviderHttpClient;
use super::trait_::AdapterPolicy;
use super::{ProviderAdapter, ProviderKind};
use crate::clock::Clock;
use crate::domain::normalize_domain;
use crate::error::AdapterError;
use crate::models::{Location, Signal, SignalFields, SignalQuery};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationLookup {
    organization: Option<AdOrganization>,
    #[serde(default)]
    engagement: Option<AdEngagement>,
    #[serde(default)]
    match_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdOrganization {
    vanity_domain: Option<String>,
    localized_name: Option<String>,
    #[serde(default)]
    industries: Vec<String>,
    staff_count_range: Option<StaffCountRange>,
    #[serde(default)]
    locations: Vec<AdLocation>,
}

#[derive(Debug, Deserialize)]
struct StaffCountRange {
    start: u32,
    end: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AdLocation {
    city: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdEngagement {
    #[serde(default)]
    clicks: u64,
    #[serde(default)]
    impressions: u64,
    last_click_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EngagedPage {
    #[serde(default)]
    elements: Vec<OrganizationLookup>,
}

pub struct AdsAdapter {
    provider_id: String,
    http: ProviderHttpClient,
    policy: AdapterPolicy,
    clock: Arc<dyn Clock>,
}

impl AdsAdapter {
    pub fn new(
        provider_id: impl Into<String>,
        http: ProviderHttpClient,
        policy: AdapterPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            http,
            policy,
            clock,
        }
    }

    fn to_signal(&self, fallback_domain: Option<&str>, lookup: OrganizationLookup) -> Option<Signal> {
        let organization = lookup.organization?;
        let raw_domain = organization.vanity_domain.as_deref().or(fallback_domain)?;
        let domain = normalize_domain(raw_domain).ok()?;

        let mut fields = SignalFields {
            name: organization.localized_name,
            industry: organization.industries.into_iter().next(),
            size: organization.staff_count_range.map(|range| match range.end {
                Some(end) => format!("{}-{}", range.start, end),
                None => format!("{}+", range.start),
            }),
            location: organization.locations.into_iter().next().map(|loc| Location {
                city: loc.city,
                country: loc.country,
            }),
            ..SignalFields::default()
        };

        if let Some(engagement) = lookup.engagement {
            // Ad click-throughs land on the site; count them as visits.
            fields.total_visits = Some(engagement.clicks);
            fields.last_seen = engagement.last_click_at;
            let mut tags = BTreeSet::new();
            if engagement.impressions > 0 {
                tags.insert("ad-audience".to_string());
            }
            if engagement.clicks > 0 {
                tags.insert("ad-engaged".to_string());
            }
            fields.tags = tags;
        }

        Some(Signal::new(
            self.provider_id.clone(),
            domain,
            fields,
            lookup.match_rate.unwrap_or(0.6),
            self.clock.now(),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for AdsAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ads
    }

    fn policy(&self) -> AdapterPolicy {
        self.policy
    }

    async fn fetch_signal(&self, query: &SignalQuery) -> Result<Option<Signal>, AdapterError> {
        let lookup: Option<OrganizationLookup> = self
            .http
            .get_json(
                "v2/organizations/lookup",
                &[("domain", query.domain.clone())],
            )
            .await?;
        Ok(lookup.and_then(|lookup| self.to_signal(Some(&query.domain), lookup)))
    }

    async fn pull_updates(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>, AdapterError> {
        let mut params = Vec::new();
        if let Some(since) = since {
            params.push(("since", since.to_rfc3339()));
        }
        let page: Option<EngagedPage> = self
            .http
            .get_json("v2/organizations/engaged", &params)
            .await?;
        Ok(page
            .map(|page| {
                page.elements
                    .into_iter()
                    .filter_map(|lookup| self.to_signal(None, lookup))
                    .collect()
            })
            .unwrap_or_default())
    }
}
