//! Wire envelopes exchanged between the page extractor, the UI and the
//! background service.
//!
//! Requests are JSON objects discriminated by a `type` field using the
//! extension's historical names (`IPS_FOUND`, `ENRICH_IP`, ...). Field names
//! are camelCase. Addresses arrive as strings and are validated by the
//! handler, so a malformed address becomes an `ERROR` response instead of a
//! decode failure of the whole envelope.

use std::net::Ipv4Addr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{AbuseResult, EnrichmentResult, GeoResult, TabId, TabRecords, Timestamp};
use crate::store::MergeOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    /// Addresses found on a page loaded in `tab_id`.
    IpsFound {
        tab_id: TabId,
        ips: Vec<String>,
        url: String,
    },
    /// Enrich one address; merged into `tab_id` when given.
    EnrichIp {
        ip: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    GetTabIps {
        tab_id: TabId,
    },
    ClearData {
        tab_id: TabId,
    },
    SaveApiKey {
        api_key: String,
    },
    /// Fire-and-forget; produces no response.
    TabClosed {
        tab_id: TabId,
    },
    /// Enrich every record of the tab that is missing data.
    ScanTab {
        tab_id: TabId,
    },
}

impl Request {
    /// Tab the request is scoped to, if any.
    pub fn tab(&self) -> Option<TabId> {
        match self {
            Request::IpsFound { tab_id, .. }
            | Request::GetTabIps { tab_id }
            | Request::ClearData { tab_id }
            | Request::TabClosed { tab_id }
            | Request::ScanTab { tab_id } => Some(*tab_id),
            Request::EnrichIp { tab_id, .. } => *tab_id,
            Request::SaveApiKey { .. } => None,
        }
    }
}

/// Outcome of a bulk tab scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Records that were enriched.
    pub scanned: usize,
    /// Results written back to the store.
    pub merged: usize,
    /// Results discarded because the tab or record disappeared.
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Response {
    Ack,
    Enrichment {
        geo: Option<GeoResult>,
        abuse: AbuseResult,
        last_checked: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merge: Option<MergeOutcome>,
    },
    TabIps {
        ip_data: TabRecords,
        /// Addresses with an enrichment currently in flight.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        loading: Vec<Ipv4Addr>,
    },
    ScanSummary(ScanSummary),
    Error {
        message: String,
    },
}

impl Response {
    pub fn enrichment(result: EnrichmentResult, merge: Option<MergeOutcome>) -> Self {
        Response::Enrichment {
            geo: result.geo,
            abuse: result.abuse,
            last_checked: result.last_checked,
            merge,
        }
    }

    /// Records plus the in-flight marker list derived from their `loading`
    /// flags.
    pub fn tab_ips(ip_data: TabRecords) -> Self {
        let loading = ip_data
            .values()
            .filter(|r| r.loading)
            .map(|r| r.ip)
            .collect();
        Response::TabIps { ip_data, loading }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SightingRecord;
    use serde_json::json;

    #[test]
    fn ips_found_wire_shape() {
        let req: Request = serde_json::from_value(json!({
            "type": "IPS_FOUND",
            "tabId": 7,
            "ips": ["8.8.8.8"],
            "url": "https://example.com"
        }))
        .unwrap();
        assert_eq!(
            req,
            Request::IpsFound {
                tab_id: TabId(7),
                ips: vec!["8.8.8.8".into()],
                url: "https://example.com".into(),
            }
        );
        assert_eq!(req.tab(), Some(TabId(7)));
    }

    #[test]
    fn enrich_ip_tab_is_optional() {
        let req: Request =
            serde_json::from_value(json!({"type": "ENRICH_IP", "ip": "1.1.1.1"})).unwrap();
        assert_eq!(
            req,
            Request::EnrichIp {
                ip: "1.1.1.1".into(),
                tab_id: None
            }
        );

        let req: Request = serde_json::from_value(json!({
            "type": "ENRICH_IP", "ip": "1.1.1.1", "tabId": 3
        }))
        .unwrap();
        assert_eq!(req.tab(), Some(TabId(3)));
    }

    #[test]
    fn save_api_key_uses_camel_case() {
        let req: Request =
            serde_json::from_value(json!({"type": "SAVE_API_KEY", "apiKey": "abc"})).unwrap();
        assert_eq!(
            req,
            Request::SaveApiKey {
                api_key: "abc".into()
            }
        );
        assert_eq!(req.tab(), None);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let res = serde_json::from_value::<Request>(json!({"type": "NOPE", "tabId": 1}));
        assert!(res.is_err());
    }

    #[test]
    fn enrichment_response_shape() {
        let res = Response::enrichment(
            EnrichmentResult {
                geo: None,
                abuse: AbuseResult::failed("API key not configured"),
                last_checked: 1_700_000_000_000,
            },
            None,
        );
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            json!({
                "type": "ENRICHMENT",
                "geo": null,
                "abuse": {"error": "API key not configured"},
                "lastChecked": 1_700_000_000_000i64
            })
        );
    }

    #[test]
    fn tab_ips_lists_in_flight_addresses() {
        let ip: Ipv4Addr = "8.8.8.8".parse().unwrap();
        let mut record = SightingRecord::new(ip, "https://example.com", 1);
        record.loading = true;
        let mut data = TabRecords::new();
        data.insert(ip, record);

        let value = serde_json::to_value(Response::tab_ips(data)).unwrap();
        assert_eq!(value["type"], "TAB_IPS");
        assert_eq!(value["ipData"]["8.8.8.8"]["sources"][0], "https://example.com");
        assert!(value["ipData"]["8.8.8.8"].get("loading").is_none());
        assert_eq!(value["loading"], json!(["8.8.8.8"]));
    }

    #[test]
    fn scan_summary_and_ack_shapes() {
        let res = Response::ScanSummary(ScanSummary {
            scanned: 2,
            merged: 1,
            dropped: 1,
        });
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            json!({"type": "SCAN_SUMMARY", "scanned": 2, "merged": 1, "dropped": 1})
        );
        assert_eq!(
            serde_json::to_value(Response::Ack).unwrap(),
            json!({"type": "ACK"})
        );
        assert!(Response::error("bad").is_error());
    }
}
