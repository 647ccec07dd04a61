//! CRM adapter
//!
//! Reads company records from a CRM search API. CRM data is curated by
//! humans, so it carries a fixed, configurable confidence instead of a
//! per-record match score.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::http::ProviderHttpClient;
use super::trait_::AdapterPolicy;
use super::{ProviderAdapter, ProviderKind};
use crate::clock::Clock;
use crate::domain::normalize_domain;
use crate::error::AdapterError;
use crate::models::{Location, Signal, SignalFields, SignalQuery};

pub const DEFAULT_CRM_CONFIDENCE: f64 = 0.95;
const SEARCH_PATH: &str = "crm/v3/objects/companies/search";
const PROPERTIES: &[&str] = &[
    "name",
    "domain",
    "industry",
    "numberofemployees",
    "city",
    "country",
    "lifecyclestage",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<CompanyObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyObject {
    properties: CompanyProperties,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CompanyProperties {
    name: Option<String>,
    domain: Option<String>,
    industry: Option<String>,
    numberofemployees: Option<String>,
    city: Option<String>,
    country: Option<String>,
    lifecyclestage: Option<String>,
}

pub struct CrmAdapter {
    provider_id: String,
    http: ProviderHttpClient,
    policy: AdapterPolicy,
    confidence: f64,
    clock: Arc<dyn Clock>,
}

impl CrmAdapter {
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
            confidence: DEFAULT_CRM_CONFIDENCE,
            clock,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn to_signal(&self, company: CompanyObject) -> Option<Signal> {
        let props = company.properties;
        let domain = normalize_domain(props.domain.as_deref()?).ok()?;

        let mut tags = BTreeSet::new();
        tags.insert("crm-record".to_string());
        if let Some(stage) = props.lifecyclestage.filter(|s| !s.trim().is_empty()) {
            tags.insert(format!("crm:{}", stage.trim().to_ascii_lowercase()));
        }

        let location = Location {
            city: props.city,
            country: props.country,
        };

        let fields = SignalFields {
            name: props.name,
            industry: props.industry,
            size: props.numberofemployees.filter(|n| !n.trim().is_empty()),
            location: (!location.is_empty()).then_some(location),
            tags,
            ..SignalFields::default()
        };

        Some(Signal::new(
            self.provider_id.clone(),
            domain,
            fields,
            self.confidence,
            company.updated_at.unwrap_or_else(|| self.clock.now()),
        ))
    }

    async fn search(&self, body: serde_json::Value) -> Result<Vec<Signal>, AdapterError> {
        let response: Option<SearchResponse> = self.http.post_json(SEARCH_PATH, &body).await?;
        Ok(response
            .map(|r| r.results.into_iter().filter_map(|c| self.to_signal(c)).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProviderAdapter for CrmAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Crm
    }

    fn policy(&self) -> AdapterPolicy {
        self.policy
    }

    async fn fetch_signal(&self, query: &SignalQuery) -> Result<Option<Signal>, AdapterError> {
        let body = json!({
            "filterGroups": [{
                "filters": [{ "propertyName": "domain", "operator": "EQ", "value": query.domain }]
            }],
            "properties": PROPERTIES,
            "limit": 1,
        });
        let mut signals = self.search(body).await?;
        Ok(if signals.is_empty() {
            None
        } else {
            Some(signals.swap_remove(0))
        })
    }

    async fn pull_updates(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>, AdapterError> {
        let filter_groups = match since {
            Some(since) => json!([{
                "filters": [{
                    "propertyName": "hs_lastmodifieddate",
                    "operator": "GTE",
                    "value": since.timestamp_millis().to_string(),
                }]
            }]),
            None => json!([]),
        };
        let body = json!({
            "filterGroups": filter_groups,
            "properties": PROPERTIES,
            "limit": 100,
        });
        self.search(body).await
    }
}
