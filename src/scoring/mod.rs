//! # Lead Scoring Engine
//!
//! Computes a 0-100 composite score from three dimensions (intent, fit and
//! urgency) and derives the hot/warm/cold status. Scoring is a pure function
//! of the record, the configuration and an explicit `now`.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::models::{LeadStatus, OrganizationRecord};

static SIZE_LOWER_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("size pattern is valid"));

/// Points awarded to recorded behaviors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IntentPoints {
    /// Page depth at which a session counts as "deep".
    pub deep_page_depth_threshold: u32,
    pub deep_page_depth: u32,
    pub form_submission: u32,
    pub pricing_page_visit: u32,
    pub per_visit: u32,
}

impl Default for IntentPoints {
    fn default() -> Self {
        Self {
            deep_page_depth_threshold: 5,
            deep_page_depth: 20,
            form_submission: 50,
            pricing_page_visit: 70,
            per_visit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FitTier {
    pub min_employees: u32,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScoreWeights {
    pub intent: f64,
    pub fit: f64,
    pub urgency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            intent: 0.4,
            fit: 0.3,
            urgency: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StatusThresholds {
    pub hot: u8,
    pub warm: u8,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self { hot: 80, warm: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScoringConfig {
    #[serde(default)]
    pub intent: IntentPoints,
    /// Evaluated from the largest `min_employees` down.
    #[serde(default = "default_fit_tiers")]
    pub fit_tiers: Vec<FitTier>,
    #[serde(default = "default_fit_fallback")]
    pub fit_fallback: u32,
    #[serde(default = "default_urgency_decay_per_day")]
    pub urgency_decay_per_day: u32,
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub thresholds: StatusThresholds,
}

fn default_fit_tiers() -> Vec<FitTier> {
    vec![
        FitTier {
            min_employees: 500,
            score: 90,
        },
        FitTier {
            min_employees: 50,
            score: 70,
        },
    ]
}

fn default_fit_fallback() -> u32 {
    50
}

fn default_urgency_decay_per_day() -> u32 {
    10
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            intent: IntentPoints::default(),
            fit_tiers: default_fit_tiers(),
            fit_fallback: default_fit_fallback(),
            urgency_decay_per_day: default_urgency_decay_per_day(),
            weights: ScoreWeights::default(),
            thresholds: StatusThresholds::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        let ScoreWeights {
            intent,
            fit,
            urgency,
        } = self.weights;
        if [intent, fit, urgency].iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err("weights must each be between 0.0 and 1.0".to_string());
        }
        if ((intent + fit + urgency) - 1.0).abs() > 1e-6 {
            return Err(format!(
                "weights must sum to 1.0, got {}",
                intent + fit + urgency
            ));
        }
        if self.thresholds.hot > 100 || self.thresholds.warm > self.thresholds.hot {
            return Err(format!(
                "thresholds must satisfy warm <= hot <= 100 (warm: {}, hot: {})",
                self.thresholds.warm, self.thresholds.hot
            ));
        }
        if self.fit_fallback > 100 || self.fit_tiers.iter().any(|t| t.score > 100) {
            return Err("fit scores must be at most 100".to_string());
        }
        Ok(())
    }

    pub fn status_for(&self, score: u8) -> LeadStatus {
        if score >= self.thresholds.hot {
            LeadStatus::Hot
        } else if score >= self.thresholds.warm {
            LeadStatus::Warm
        } else {
            LeadStatus::Cold
        }
    }
}

/// Score breakdown for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadScore {
    pub score: u8,
    pub status: LeadStatus,
    pub intent: u32,
    pub fit: u32,
    pub urgency: u32,
}

/// Score a record as of `now`.
pub fn score(record: &OrganizationRecord, config: &ScoringConfig, now: DateTime<Utc>) -> LeadScore {
    let intent = intent_score(record, config);
    let fit = fit_score(record.size.as_deref(), config);
    let urgency = urgency_score(record.last_seen, config, now);

    let weighted = f64::from(intent) * config.weights.intent
        + f64::from(fit) * config.weights.fit
        + f64::from(urgency) * config.weights.urgency;
    let composite = weighted.round().clamp(0.0, 100.0) as u8;

    LeadScore {
        score: composite,
        status: config.status_for(composite),
        intent,
        fit,
        urgency,
    }
}

/// Score a record and store the result on it.
pub fn apply_score(
    record: &mut OrganizationRecord,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> LeadScore {
    let result = score(record, config, now);
    record.score = result.score;
    record.status = result.status;
    result
}

fn intent_score(record: &OrganizationRecord, config: &ScoringConfig) -> u32 {
    let points = &config.intent;
    let engagement = &record.engagement;

    let mut base: u32 = 0;
    if engagement.max_page_depth >= points.deep_page_depth_threshold {
        base = base.saturating_add(points.deep_page_depth);
    }
    if engagement.form_submissions > 0 {
        base = base.saturating_add(points.form_submission);
    }
    if engagement.pricing_page_visits > 0 {
        base = base.saturating_add(points.pricing_page_visit);
    }
    let base = base.min(100);

    let visits = u32::try_from(record.total_visits).unwrap_or(u32::MAX);
    base.saturating_add(visits.saturating_mul(points.per_visit))
        .min(100)
}

/// Lower bound of an employee-count label such as `"50-200"`, `"1,000+"`
/// or `"120"`.
pub fn size_lower_bound(size: &str) -> Option<u32> {
    let found = SIZE_LOWER_BOUND.find(size)?;
    found.as_str().replace(',', "").parse().ok()
}

fn fit_score(size: Option<&str>, config: &ScoringConfig) -> u32 {
    let Some(lower) = size.and_then(size_lower_bound) else {
        return config.fit_fallback;
    };

    let mut tiers: Vec<&FitTier> = config.fit_tiers.iter().collect();
    tiers.sort_by(|a, b| b.min_employees.cmp(&a.min_employees));
    tiers
        .into_iter()
        .find(|tier| lower >= tier.min_employees)
        .map(|tier| tier.score)
        .unwrap_or(config.fit_fallback)
}

fn urgency_score(last_seen: DateTime<Utc>, config: &ScoringConfig, now: DateTime<Utc>) -> u32 {
    let days = (now - last_seen).num_days().max(0);
    let days = u32::try_from(days).unwrap_or(u32::MAX);
    100u32.saturating_sub(days.saturating_mul(config.urgency_decay_per_day))
}

/// Scoring configuration bound to a clock.
#[derive(Debug, Clone)]
pub struct LeadScorer {
    config: ScoringConfig,
    clock: Arc<dyn Clock>,
}

impl LeadScorer {
    pub fn new(config: ScoringConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn score(&self, record: &OrganizationRecord) -> LeadScore {
        score(record, &self.config, self.clock.now())
    }

    pub fn apply(&self, record: &mut OrganizationRecord) -> LeadScore {
        apply_score(record, &self.config, self.clock.now())
    }
}
