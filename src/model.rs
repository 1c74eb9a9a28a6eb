//! Record types shared by the store, the enrichment orchestrator and the
//! formatters.
//!
//! Field names serialize in camelCase so the persisted state file keeps the
//! layout the browser extension used (`firstSeen`, `lastChecked`, ...).

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::IpWatchError;

/// Epoch milliseconds.
pub type Timestamp = i64;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Browser tab identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = IpWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(TabId)
            .map_err(|_| IpWatchError::invalid_tab(s))
    }
}

impl From<u32> for TabId {
    fn from(v: u32) -> Self {
        TabId(v)
    }
}

/// Normalized geolocation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeoResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    /// `AS<digits>` token, or the raw AS description when no token was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    /// Reverse DNS name reported by the geolocation source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
}

/// Normalized abuse-reputation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AbuseReport {
    /// Abuse confidence score, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abuse_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_tor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_whitelisted: Option<bool>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Outcome of a reputation lookup: a report or an inline error marker.
///
/// Serialized untagged, so an error reads `{"error": "API error: 429"}` and a
/// report is the bare report object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AbuseResult {
    // Listed first: a report has no `error` field, so this arm only matches
    // real error markers during deserialization.
    Failed { error: String },
    Report(AbuseReport),
}

impl AbuseResult {
    pub fn failed(message: impl Into<String>) -> Self {
        AbuseResult::Failed {
            error: message.into(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AbuseResult::Failed { error } => Some(error),
            AbuseResult::Report(_) => None,
        }
    }

    pub fn report(&self) -> Option<&AbuseReport> {
        match self {
            AbuseResult::Report(r) => Some(r),
            AbuseResult::Failed { .. } => None,
        }
    }
}

/// Combined outcome of one enrichment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub geo: Option<GeoResult>,
    pub abuse: AbuseResult,
    pub last_checked: Timestamp,
}

/// Partial update applied to an existing record. Absent fields are left as
/// they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentPatch {
    pub geo: Option<GeoResult>,
    pub abuse: Option<AbuseResult>,
    pub last_checked: Option<Timestamp>,
}

impl From<EnrichmentResult> for EnrichmentPatch {
    /// A degraded geolocation lookup carries no information, so it does not
    /// erase geo data from an earlier successful enrichment.
    fn from(result: EnrichmentResult) -> Self {
        Self {
            geo: result.geo,
            abuse: Some(result.abuse),
            last_checked: Some(result.last_checked),
        }
    }
}

/// One observed address within one tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SightingRecord {
    pub ip: Ipv4Addr,
    pub first_seen: Timestamp,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abuse: Option<AbuseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<Timestamp>,
    /// Presentation-only: set on read while an enrichment is in flight.
    #[serde(skip)]
    #[schemars(skip)]
    pub loading: bool,
}

impl SightingRecord {
    pub fn new(ip: Ipv4Addr, source_url: impl Into<String>, first_seen: Timestamp) -> Self {
        Self {
            ip,
            first_seen,
            sources: vec![source_url.into()],
            geo: None,
            abuse: None,
            last_checked: None,
            loading: false,
        }
    }

    /// Append a source URL unless already present. Returns true if appended.
    pub fn add_source(&mut self, url: &str) -> bool {
        if self.sources.iter().any(|s| s == url) {
            return false;
        }
        self.sources.push(url.to_string());
        true
    }

    /// Shallow-merge the fields present in `patch`.
    pub fn apply(&mut self, patch: EnrichmentPatch) {
        if let Some(geo) = patch.geo {
            self.geo = Some(geo);
        }
        if let Some(abuse) = patch.abuse {
            self.abuse = Some(abuse);
        }
        if let Some(ts) = patch.last_checked {
            self.last_checked = Some(ts);
        }
    }

    /// True if either sub-result is missing (bulk scans pick these up).
    pub fn needs_enrichment(&self) -> bool {
        self.geo.is_none() || self.abuse.is_none()
    }

    /// True once any enrichment data is present.
    pub fn is_scanned(&self) -> bool {
        self.geo.is_some() || self.abuse.is_some()
    }
}

/// IP -> record mapping for a single tab.
pub type TabRecords = BTreeMap<Ipv4Addr, SightingRecord>;

/// Tab -> (IP -> record) mapping.
pub type TabAddressMap = BTreeMap<TabId, TabRecords>;
