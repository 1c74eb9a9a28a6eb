use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::Deserialize;

use super::ReputationLookup;
use crate::errors::{IpWatchError, Result};
use crate::model::AbuseReport;

/// AbuseIPDB v2 check endpoint.
pub const DEFAULT_ABUSE_ENDPOINT: &str = "https://api.abuseipdb.com/api/v2/check";

/// Report window requested from AbuseIPDB.
pub const DEFAULT_MAX_AGE_DAYS: u32 = 90;

#[derive(Debug, Deserialize)]
struct CheckEnvelope {
    data: CheckData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckData {
    abuse_confidence_score: Option<u8>,
    total_reports: Option<u32>,
    last_reported_at: Option<String>,
    usage_type: Option<String>,
    is_tor: Option<bool>,
    is_whitelisted: Option<bool>,
    hostnames: Option<Vec<String>>,
    domain: Option<String>,
}

impl From<CheckData> for AbuseReport {
    fn from(d: CheckData) -> Self {
        AbuseReport {
            abuse_score: d.abuse_confidence_score,
            reports: d.total_reports,
            last_reported: d.last_reported_at,
            usage_type: d.usage_type,
            is_tor: d.is_tor,
            is_whitelisted: d.is_whitelisted,
            hostnames: d.hostnames.unwrap_or_default(),
            domain: d.domain,
        }
    }
}

/// AbuseIPDB reputation source.
#[derive(Debug, Clone)]
pub struct AbuseIpDbSource {
    client: reqwest::Client,
    endpoint: String,
    max_age_days: u32,
}

impl AbuseIpDbSource {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = days;
        self
    }
}

#[async_trait]
impl ReputationLookup for AbuseIpDbSource {
    fn name(&self) -> &'static str {
        "abuseipdb"
    }

    async fn check(&self, ip: Ipv4Addr, credential: &str) -> Result<AbuseReport> {
        let target = ip.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ipAddress", target.clone()),
                ("maxAgeInDays", self.max_age_days.to_string()),
            ])
            .header("Key", credential)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| IpWatchError::network("reputation lookup", &target, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IpWatchError::http_status(self.name(), status.as_u16()));
        }

        let envelope: CheckEnvelope = response
            .json()
            .await
            .map_err(|e| IpWatchError::network("reputation decode", &target, e))?;
        Ok(envelope.data.into())
    }
}
