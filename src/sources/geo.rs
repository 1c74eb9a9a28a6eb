use std::net::Ipv4Addr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::GeoLookup;
use crate::errors::{IpWatchError, Result};
use crate::model::GeoResult;

/// Public ip-api.com JSON endpoint.
pub const DEFAULT_GEO_ENDPOINT: &str = "http://ip-api.com/json";

/// Fields requested from the geolocation service.
const GEO_FIELDS: &str = "status,country,city,isp,as,reverse,org";

static ASN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"AS\d+").unwrap());

/// Raw ip-api response (only the consumed fields).
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: Option<String>,
    country: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    #[serde(rename = "as")]
    as_desc: Option<String>,
    reverse: Option<String>,
    org: Option<String>,
}

/// `AS15169 Google LLC` -> `AS15169`; text without a token passes through.
pub fn extract_asn(as_desc: &str) -> String {
    ASN_RE
        .find(as_desc)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| as_desc.to_string())
}

/// Empty strings from the service mean "unknown".
fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl IpApiResponse {
    fn into_geo(self) -> Option<GeoResult> {
        if self.status.as_deref() != Some("success") {
            return None;
        }
        Some(GeoResult {
            country: non_empty(self.country),
            city: non_empty(self.city),
            isp: non_empty(self.isp),
            asn: non_empty(self.as_desc).map(|a| extract_asn(&a)),
            domain: non_empty(self.reverse),
            org: non_empty(self.org),
        })
    }
}

/// ip-api.com style geolocation source.
#[derive(Debug, Clone)]
pub struct IpApiSource {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiSource {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn url_for(&self, ip: Ipv4Addr) -> String {
        format!(
            "{}/{ip}?fields={GEO_FIELDS}",
            self.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl GeoLookup for IpApiSource {
    fn name(&self) -> &'static str {
        "ip-api"
    }

    async fn lookup(&self, ip: Ipv4Addr) -> Result<Option<GeoResult>> {
        let target = ip.to_string();
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .map_err(|e| IpWatchError::network("geolocation lookup", &target, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IpWatchError::http_status(self.name(), status.as_u16()));
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| IpWatchError::network("geolocation decode", &target, e))?;
        Ok(body.into_geo())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> IpApiSource {
        IpApiSource::new(reqwest::Client::new(), format!("{}/json/", server.uri()))
    }

    #[test]
    fn asn_token_extraction() {
        assert_eq!(extract_asn("AS15169 Google LLC"), "AS15169");
        assert_eq!(extract_asn("Cloudflare AS13335"), "AS13335");
        assert_eq!(extract_asn("unknown network"), "unknown network");
    }

    #[tokio::test]
    async fn success_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/8.8.8.8"))
            .and(query_param("fields", GEO_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "country": "United States",
                "city": "Ashburn",
                "isp": "Google LLC",
                "as": "AS15169 Google LLC",
                "reverse": "dns.google",
                "org": "Google Public DNS"
            })))
            .mount(&server)
            .await;

        let geo = source(&server)
            .lookup("8.8.8.8".parse().unwrap())
            .await
            .unwrap()
            .expect("geo data");
        assert_eq!(geo.country.as_deref(), Some("United States"));
        assert_eq!(geo.city.as_deref(), Some("Ashburn"));
        assert_eq!(geo.asn.as_deref(), Some("AS15169"));
        assert_eq!(geo.domain.as_deref(), Some("dns.google"));
        assert_eq!(geo.org.as_deref(), Some("Google Public DNS"));
    }

    #[tokio::test]
    async fn empty_fields_are_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/203.0.113.9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "country": "Netherlands",
                "city": "",
                "isp": "Example BV",
                "as": "",
                "reverse": "",
                "org": " "
            })))
            .mount(&server)
            .await;

        let geo = source(&server)
            .lookup("203.0.113.9".parse().unwrap())
            .await
            .unwrap()
            .expect("geo data");
        assert_eq!(geo.country.as_deref(), Some("Netherlands"));
        assert_eq!(geo.city, None);
        assert_eq!(geo.asn, None);
        assert_eq!(geo.domain, None);
        assert_eq!(geo.org, None);
    }

    #[tokio::test]
    async fn fail_status_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "fail",
                "message": "reserved range"
            })))
            .mount(&server)
            .await;

        let geo = source(&server)
            .lookup("1.1.1.1".parse().unwrap())
            .await
            .unwrap();
        assert!(geo.is_none());
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source(&server)
            .lookup("1.1.1.1".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, IpWatchError::HttpStatus { status: 503, .. }));
    }
}
