//! Web analytics adapter
//!
//! Reverse-IP visitor identification: resolves a domain (and optionally a
//! visitor IP) to company attributes plus session engagement.

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
use crate::models::{EngagementSignals, Location, Signal, SignalFields, SignalQuery};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisitorLookup {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    company: Option<Company>,
    #[serde(default)]
    sessions: Option<Sessions>,
    #[serde(default)]
    match_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Company {
    company_name: Option<String>,
    sector: Option<String>,
    employee_range: Option<String>,
    geo: Option<Geo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Geo {
    city_name: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sessions {
    #[serde(default)]
    session_count: u64,
    #[serde(default)]
    max_pages_per_session: u32,
    #[serde(default)]
    form_submits: u32,
    #[serde(default)]
    pricing_page_views: u32,
    last_session_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct VisitorPage {
    #[serde(default)]
    results: Vec<VisitorLookup>,
}

pub struct AnalyticsAdapter {
    provider_id: String,
    http: ProviderHttpClient,
    policy: AdapterPolicy,
    clock: Arc<dyn Clock>,
}

impl AnalyticsAdapter {
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

    fn to_signal(&self, fallback_domain: Option<&str>, lookup: VisitorLookup) -> Option<Signal> {
        let raw_domain = lookup.domain.as_deref().or(fallback_domain)?;
        let domain = normalize_domain(raw_domain).ok()?;

        let mut fields = SignalFields::default();
        if let Some(company) = lookup.company {
            fields.name = company.company_name;
            fields.industry = company.sector;
            fields.size = company.employee_range;
            fields.location = company.geo.map(|geo| Location {
                city: geo.city_name,
                country: geo.country_code,
            });
        }
        if let Some(sessions) = lookup.sessions {
            fields.total_visits = Some(sessions.session_count);
            fields.engagement = Some(EngagementSignals {
                max_page_depth: sessions.max_pages_per_session,
                form_submissions: sessions.form_submits,
                pricing_page_visits: sessions.pricing_page_views,
            });
            fields.last_seen = sessions.last_session_at;
            let mut tags = BTreeSet::new();
            tags.insert("web-visitor".to_string());
            if sessions.pricing_page_views > 0 {
                tags.insert("pricing-interest".to_string());
            }
            fields.tags = tags;
        }

        Some(Signal::new(
            self.provider_id.clone(),
            domain,
            fields,
            lookup.match_confidence.unwrap_or(0.5),
            self.clock.now(),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for AnalyticsAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Analytics
    }

    fn policy(&self) -> AdapterPolicy {
        self.policy
    }

    async fn fetch_signal(&self, query: &SignalQuery) -> Result<Option<Signal>, AdapterError> {
        let mut params = vec![("domain", query.domain.clone())];
        if let Some(ip) = query.ip_address {
            params.push(("ip", ip.to_string()));
        }
        let lookup: Option<VisitorLookup> =
            self.http.get_json("v1/visitors/company", &params).await?;
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
        let page: Option<VisitorPage> = self.http.get_json("v1/visitors/companies", &params).await?;
        Ok(page
            .map(|page| {
                page.results
                    .into_iter()
                    .filter_map(|lookup| self.to_signal(None, lookup))
                    .collect()
            })
            .unwrap_or_default())
    }
}
