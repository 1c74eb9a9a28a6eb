//! Presentation helpers for tab records.
//!
//! Threat banding, tab statistics, search filtering and the plain-text
//! formatter live here. Colored terminal output is in `styled_output`,
//! JSON/YAML reports in `structured_output`.

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{AbuseResult, EnrichmentResult, GeoResult, SightingRecord, TabId, TabRecords};

/// Abuse scores at or above this count as malicious.
pub const MALICIOUS_SCORE: u8 = 25;

/// Base URL of the public AbuseIPDB report page.
const ABUSEIPDB_CHECK_URL: &str = "https://www.abuseipdb.com/check";

/// Threat band shown for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    /// Enrichment in flight
    Checking,
    NotScanned,
    /// Reputation lookup failed
    Error,
    Safe,
    LowRisk,
    MediumRisk,
    HighRisk,
}

impl ThreatLevel {
    /// Band for a record; `loading` wins over any stored data.
    pub fn assess(record: &SightingRecord) -> Self {
        if record.loading {
            return ThreatLevel::Checking;
        }
        Self::from_abuse(record.abuse.as_ref())
    }

    /// Band from the reputation part alone; geo data never changes it.
    pub fn from_abuse(abuse: Option<&AbuseResult>) -> Self {
        match abuse {
            None => ThreatLevel::NotScanned,
            Some(AbuseResult::Failed { .. }) => ThreatLevel::Error,
            Some(AbuseResult::Report(report)) => match report.abuse_score {
                None => ThreatLevel::NotScanned,
                Some(score) => Self::from_score(score),
            },
        }
    }

    pub fn from_score(score: u8) -> Self {
        match score {
            0 => ThreatLevel::Safe,
            s if s < MALICIOUS_SCORE => ThreatLevel::LowRisk,
            s if s < 75 => ThreatLevel::MediumRisk,
            _ => ThreatLevel::HighRisk,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ThreatLevel::Checking => "Checking...",
            ThreatLevel::NotScanned => "Not Scanned",
            ThreatLevel::Error => "Error",
            ThreatLevel::Safe => "Safe",
            ThreatLevel::LowRisk => "Low Risk",
            ThreatLevel::MediumRisk => "Medium Risk",
            ThreatLevel::HighRisk => "High Risk",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Counters shown above a tab's list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TabStats {
    pub total: usize,
    /// Records whose reputation report scores at least [`MALICIOUS_SCORE`]
    pub malicious: usize,
}

impl TabStats {
    pub fn of(records: &TabRecords) -> Self {
        Self {
            total: records.len(),
            malicious: records.values().filter(|r| is_malicious(r)).count(),
        }
    }
}

pub fn is_malicious(record: &SightingRecord) -> bool {
    record
        .abuse
        .as_ref()
        .and_then(AbuseResult::report)
        .and_then(|r| r.abuse_score)
        .is_some_and(|s| s >= MALICIOUS_SCORE)
}

/// Case-insensitive match against the address text and the geo country,
/// city and ISP. An empty query matches everything.
pub fn matches_search(record: &SightingRecord, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    if record.ip.to_string().contains(&query) {
        return true;
    }
    record.geo.as_ref().is_some_and(|geo| {
        [&geo.country, &geo.city, &geo.isp]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&query))
    })
}

/// Records matching `query`, in address order.
pub fn filter_records<'a>(records: &'a TabRecords, query: &str) -> Vec<&'a SightingRecord> {
    records
        .values()
        .filter(|r| matches_search(r, query))
        .collect()
}

/// `city, country` from whichever parts are present.
pub fn geo_summary(geo: &GeoResult) -> Option<String> {
    let parts: Vec<&str> = [&geo.city, &geo.country]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

pub fn abuseipdb_check_url(ip: Ipv4Addr) -> String {
    format!("{ABUSEIPDB_CHECK_URL}/{ip}")
}

/// Output format options
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tab-separated text, one record per line
    Plain,
    /// Colored, human-oriented listing
    #[default]
    Styled,
    Json,
    Yaml,
}

impl OutputFormat {
    /// JSON and YAML are meant for machines; they suppress chatter.
    pub fn is_structured(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Yaml)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(OutputFormat::Plain),
            "styled" => Ok(OutputFormat::Styled),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Output formatter trait
pub trait OutputFormatter {
    /// Render a tab listing (already filtered by the caller)
    fn format_tab(&self, tab: TabId, records: &[&SightingRecord], stats: TabStats)
    -> io::Result<String>;

    /// Render a single enrichment result
    fn format_lookup(&self, ip: Ipv4Addr, result: &EnrichmentResult) -> io::Result<String>;

    /// Get the MIME type for this format
    fn mime_type(&self) -> &'static str;
}

/// Plain text formatter: `ip<TAB>threat<TAB>score<TAB>location<TAB>sources`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

fn score_text(abuse: Option<&AbuseResult>) -> String {
    match abuse {
        Some(AbuseResult::Report(r)) => r
            .abuse_score
            .map(|s| format!("{s}%"))
            .unwrap_or_else(|| "-".to_string()),
        Some(AbuseResult::Failed { error }) => error.clone(),
        None => "-".to_string(),
    }
}

impl OutputFormatter for TextFormatter {
    fn format_tab(
        &self,
        tab: TabId,
        records: &[&SightingRecord],
        stats: TabStats,
    ) -> io::Result<String> {
        let mut output = format!(
            "# tab {tab}: {} IPs, {} malicious\n",
            stats.total, stats.malicious
        );
        for record in records {
            output.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                record.ip,
                ThreatLevel::assess(record),
                score_text(record.abuse.as_ref()),
                record
                    .geo
                    .as_ref()
                    .and_then(geo_summary)
                    .unwrap_or_else(|| "-".to_string()),
                record.sources.join(",")
            ));
        }
        Ok(output)
    }

    fn format_lookup(&self, ip: Ipv4Addr, result: &EnrichmentResult) -> io::Result<String> {
        let geo = result.geo.as_ref();
        let mut output = String::new();
        output.push_str(&format!("ip\t{ip}\n"));
        output.push_str(&format!(
            "threat\t{}\n",
            ThreatLevel::from_abuse(Some(&result.abuse))
        ));
        output.push_str(&format!("score\t{}\n", score_text(Some(&result.abuse))));
        if let Some(geo) = geo {
            for (key, value) in [
                ("country", &geo.country),
                ("city", &geo.city),
                ("isp", &geo.isp),
                ("asn", &geo.asn),
                ("domain", &geo.domain),
            ] {
                if let Some(v) = value {
                    output.push_str(&format!("{key}\t{v}\n"));
                }
            }
        }
        if let Some(report) = result.abuse.report() {
            if let Some(reports) = report.reports {
                output.push_str(&format!("reports\t{reports}\n"));
            }
            if report.is_tor == Some(true) {
                output.push_str("tor\tyes\n");
            }
        }
        output.push_str(&format!("check\t{}\n", abuseipdb_check_url(ip)));
        Ok(output)
    }

    fn mime_type(&self) -> &'static str {
        "text/plain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AbuseReport;

    fn record(ip: &str) -> SightingRecord {
        SightingRecord::new(ip.parse().unwrap(), "https://example.com", 1)
    }

    fn scored(ip: &str, score: u8) -> SightingRecord {
        let mut r = record(ip);
        r.abuse = Some(AbuseResult::Report(AbuseReport {
            abuse_score: Some(score),
            ..Default::default()
        }));
        r
    }

    #[test]
    fn test_threat_bands() {
        assert_eq!(ThreatLevel::from_score(0), ThreatLevel::Safe);
        assert_eq!(ThreatLevel::from_score(1), ThreatLevel::LowRisk);
        assert_eq!(ThreatLevel::from_score(24), ThreatLevel::LowRisk);
        assert_eq!(ThreatLevel::from_score(25), ThreatLevel::MediumRisk);
        assert_eq!(ThreatLevel::from_score(74), ThreatLevel::MediumRisk);
        assert_eq!(ThreatLevel::from_score(75), ThreatLevel::HighRisk);
        assert_eq!(ThreatLevel::from_score(100), ThreatLevel::HighRisk);
    }

    #[test]
    fn test_threat_states() {
        let mut r = record("8.8.8.8");
        assert_eq!(ThreatLevel::assess(&r), ThreatLevel::NotScanned);

        r.geo = Some(GeoResult::default());
        assert_eq!(ThreatLevel::assess(&r), ThreatLevel::NotScanned);

        r.abuse = Some(AbuseResult::failed("API key not configured"));
        assert_eq!(ThreatLevel::assess(&r), ThreatLevel::Error);

        r.abuse = Some(AbuseResult::Report(AbuseReport::default()));
        assert_eq!(ThreatLevel::assess(&r), ThreatLevel::NotScanned);

        r.loading = true;
        assert_eq!(ThreatLevel::assess(&r), ThreatLevel::Checking);
        assert_eq!(ThreatLevel::Checking.to_string(), "Checking...");
    }

    #[test]
    fn test_stats_ignore_errors_and_low_scores() {
        let mut records = TabRecords::new();
        for r in [scored("1.1.1.1", 0), scored("2.2.2.2", 25), scored("3.3.3.3", 90)] {
            records.insert(r.ip, r);
        }
        let mut failed = record("4.4.4.4");
        failed.abuse = Some(AbuseResult::failed("API error: 429"));
        records.insert(failed.ip, failed);

        assert_eq!(
            TabStats::of(&records),
            TabStats {
                total: 4,
                malicious: 2
            }
        );
    }

    #[test]
    fn test_search_matches_ip_and_geo() {
        let mut r = record("203.0.113.10");
        r.geo = Some(GeoResult {
            country: Some("Germany".into()),
            city: Some("Frankfurt".into()),
            isp: Some("Hetzner Online".into()),
            ..Default::default()
        });
        assert!(matches_search(&r, ""));
        assert!(matches_search(&r, "113.1"));
        assert!(matches_search(&r, "GERMANY"));
        assert!(matches_search(&r, "frank"));
        assert!(matches_search(&r, "hetzner"));
        assert!(!matches_search(&r, "paris"));
        assert!(!matches_search(&record("8.8.8.8"), "germany"));
    }

    #[test]
    fn test_geo_summary_and_link() {
        let geo = GeoResult {
            city: Some("Ashburn".into()),
            country: Some("United States".into()),
            ..Default::default()
        };
        assert_eq!(geo_summary(&geo).as_deref(), Some("Ashburn, United States"));
        assert_eq!(geo_summary(&GeoResult::default()), None);
        assert_eq!(
            abuseipdb_check_url("8.8.8.8".parse().unwrap()),
            "https://www.abuseipdb.com/check/8.8.8.8"
        );
    }

    #[test]
    fn test_text_formatter_tab() {
        let mut records = TabRecords::new();
        let r = scored("8.8.8.8", 0);
        records.insert(r.ip, r);
        let listed = filter_records(&records, "");
        let out = TextFormatter
            .format_tab(TabId(7), &listed, TabStats::of(&records))
            .unwrap();
        assert!(out.starts_with("# tab 7: 1 IPs, 0 malicious\n"));
        assert!(out.contains("8.8.8.8\tSafe\t0%\t-\thttps://example.com\n"));
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("yml".parse::<OutputFormat>(), Ok(OutputFormat::Yaml));
        assert!("csv".parse::<OutputFormat>().is_err());
    }
}
