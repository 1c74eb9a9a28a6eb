//! Structured output module for JSON and YAML serialization.
//!
//! Reports carry the stored records plus the derived presentation data
//! (threat band, location summary, AbuseIPDB link) so that consumers do not
//! have to reimplement the banding rules.

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::model::{EnrichmentResult, SightingRecord, TabId};
use crate::output::{TabStats, ThreatLevel, abuseipdb_check_url, geo_summary};

/// Tool metadata and versioning information
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct OutputMetadata {
    pub tool_name: String,

    pub version: String,

    /// When the report was generated
    pub generated_at: chrono::DateTime<chrono::Utc>,

    /// Version of this report layout
    pub schema_version: String,
}

impl Default for OutputMetadata {
    fn default() -> Self {
        Self {
            tool_name: crate::NAME.to_string(),
            version: crate::VERSION.to_string(),
            generated_at: chrono::Utc::now(),
            schema_version: "1.0.0".to_string(),
        }
    }
}

/// One record with its derived presentation fields.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct ReportEntry {
    /// Stored sighting data, in its persisted camelCase layout
    pub record: SightingRecord,

    pub threat_level: ThreatLevel,

    /// `city, country` when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Enrichment currently in flight
    pub loading: bool,

    pub check_url: String,
}

impl From<&SightingRecord> for ReportEntry {
    fn from(record: &SightingRecord) -> Self {
        Self {
            threat_level: ThreatLevel::assess(record),
            location: record.geo.as_ref().and_then(geo_summary),
            loading: record.loading,
            check_url: abuseipdb_check_url(record.ip),
            record: record.clone(),
        }
    }
}

/// Listing of one tab's sightings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct TabReport {
    pub metadata: OutputMetadata,

    pub tab: TabId,

    /// Search filter applied to `entries`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// Counters over the whole tab, independent of the search filter
    pub statistics: TabStats,

    pub entries: Vec<ReportEntry>,
}

impl TabReport {
    pub fn new(tab: TabId, records: &[&SightingRecord], statistics: TabStats) -> Self {
        Self {
            metadata: OutputMetadata::default(),
            tab,
            search: None,
            statistics,
            entries: records.iter().map(|r| ReportEntry::from(*r)).collect(),
        }
    }

    pub fn with_search(mut self, query: Option<&str>) -> Self {
        self.search = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        self
    }

    /// Generate JSON schema for this output format
    pub fn generate_json_schema() -> Result<String> {
        let schema = schemars::schema_for!(TabReport);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Result of a one-off lookup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct LookupReport {
    pub metadata: OutputMetadata,

    pub ip: Ipv4Addr,

    pub threat_level: ThreatLevel,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    pub result: EnrichmentResult,

    pub check_url: String,
}

impl LookupReport {
    pub fn new(ip: Ipv4Addr, result: EnrichmentResult) -> Self {
        Self {
            metadata: OutputMetadata::default(),
            ip,
            threat_level: ThreatLevel::from_abuse(Some(&result.abuse)),
            location: result.geo.as_ref().and_then(geo_summary),
            check_url: abuseipdb_check_url(ip),
            result,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
