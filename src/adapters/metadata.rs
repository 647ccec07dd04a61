//! Provider metadata types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of data a provider contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Web analytics / reverse-IP visitor identification
    Analytics,
    /// Ad platform company engagement
    Ads,
    /// CRM company records
    Crm,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Analytics => "analytics",
            ProviderKind::Ads => "ads",
            ProviderKind::Crm => "crm",
        }
    }

    /// Sync cadence used when configuration does not set one.
    pub fn default_interval_minutes(&self) -> u32 {
        match self {
            ProviderKind::Analytics => 15,
            ProviderKind::Ads => 60,
            ProviderKind::Crm => 30,
        }
    }

    /// Whether providers of this kind surface previously unknown visitors.
    pub fn discovers_by_default(&self) -> bool {
        matches!(self, ProviderKind::Analytics | ProviderKind::Ads)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "analytics" => Ok(ProviderKind::Analytics),
            "ads" => Ok(ProviderKind::Ads),
            "crm" => Ok(ProviderKind::Crm),
            other => Err(format!("unknown provider kind '{other}'")),
        }
    }
}

/// Metadata about a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub id: String,
    pub kind: ProviderKind,
    pub default_interval_minutes: u32,
    /// Whether the discovery poller queries this provider.
    pub discovery: bool,
}

impl ProviderMetadata {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            kind,
            default_interval_minutes: kind.default_interval_minutes(),
            discovery: kind.discovers_by_default(),
        }
    }

    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.default_interval_minutes = minutes;
        self
    }

    pub fn with_discovery(mut self, discovery: bool) -> Self {
        self.discovery = discovery;
        self
    }
}
