//! Enrichment orchestrator.
//!
//! `Enricher::enrich` fans out to the geolocation and reputation sources at
//! the same time and waits for both to settle. Every failure is absorbed at
//! this boundary:
//!   * geolocation failures degrade to `geo: None`
//!   * reputation failures (missing key, HTTP status, transport, timeout)
//!     become an `{error}` marker
//! so callers always get a structured partial result and never an error.
//! The orchestrator does not touch the store; merging is the caller's call.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::errors::{IpWatchError, Result};
use crate::model::{AbuseResult, EnrichmentResult, GeoResult, now_millis};
use crate::sources::{
    AbuseIpDbSource, GeoLookup, IpApiSource, ReputationLookup, build_http_client,
};

/// Abuse marker used when no reputation credential is configured.
pub const MISSING_CREDENTIAL: &str = "API key not configured";

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent two-source enrichment.
#[derive(Clone)]
pub struct Enricher {
    geo: Arc<dyn GeoLookup>,
    reputation: Arc<dyn ReputationLookup>,
    geo_timeout: Duration,
    reputation_timeout: Duration,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("geo", &self.geo.name())
            .field("reputation", &self.reputation.name())
            .field("geo_timeout", &self.geo_timeout)
            .field("reputation_timeout", &self.reputation_timeout)
            .finish()
    }
}

impl Enricher {
    pub fn new(geo: Arc<dyn GeoLookup>, reputation: Arc<dyn ReputationLookup>) -> Self {
        Self {
            geo,
            reputation,
            geo_timeout: DEFAULT_LOOKUP_TIMEOUT,
            reputation_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Upper bound on each lookup; an expired lookup degrades like a
    /// transport failure.
    pub fn with_timeouts(mut self, geo: Duration, reputation: Duration) -> Self {
        self.geo_timeout = geo;
        self.reputation_timeout = reputation;
        self
    }

    /// HTTP-backed enricher (ip-api + AbuseIPDB) built from configuration.
    pub fn from_config(network: &NetworkConfig) -> Result<Self> {
        let client = build_http_client(&network.user_agent, network.connect_timeout())?;
        let geo = IpApiSource::new(client.clone(), network.geo_endpoint.clone());
        let reputation = AbuseIpDbSource::new(client, network.abuse_endpoint.clone())
            .with_max_age_days(network.max_age_days);
        Ok(Self::new(Arc::new(geo), Arc::new(reputation))
            .with_timeouts(network.geo_timeout(), network.abuse_timeout()))
    }

    /// Enrich one address. `credential` is the reputation API key as
    /// configured at call time; blank counts as absent.
    pub async fn enrich(&self, ip: Ipv4Addr, credential: Option<&str>) -> EnrichmentResult {
        let credential = credential.map(str::trim).filter(|k| !k.is_empty());
        let (geo, abuse) = tokio::join!(
            self.lookup_geo(ip),
            self.lookup_reputation(ip, credential)
        );
        debug!(
            ip = %ip,
            geo = geo.is_some(),
            abuse_error = abuse.error().unwrap_or("-"),
            "enrichment settled"
        );
        EnrichmentResult {
            geo,
            abuse,
            last_checked: now_millis(),
        }
    }

    async fn lookup_geo(&self, ip: Ipv4Addr) -> Option<GeoResult> {
        let outcome = match timeout(self.geo_timeout, self.geo.lookup(ip)).await {
            Ok(res) => res,
            Err(_) => Err(IpWatchError::timeout(
                "geolocation lookup",
                self.geo_timeout.as_secs(),
            )),
        };
        match outcome {
            Ok(Some(geo)) => Some(geo),
            Ok(None) => {
                debug!(ip = %ip, source = self.geo.name(), "no geolocation data");
                None
            }
            Err(e) => {
                warn!(ip = %ip, source = self.geo.name(), error = %e, "geolocation lookup failed");
                None
            }
        }
    }

    async fn lookup_reputation(&self, ip: Ipv4Addr, credential: Option<&str>) -> AbuseResult {
        let Some(credential) = credential else {
            return AbuseResult::failed(MISSING_CREDENTIAL);
        };
        let outcome = match timeout(
            self.reputation_timeout,
            self.reputation.check(ip, credential),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(IpWatchError::timeout(
                "reputation lookup",
                self.reputation_timeout.as_secs(),
            )),
        };
        match outcome {
            Ok(report) => AbuseResult::Report(report),
            Err(e) => {
                warn!(ip = %ip, source = self.reputation.name(), error = %e, "reputation lookup failed");
                AbuseResult::failed(abuse_error_message(&e))
            }
        }
    }
}

/// Inline error label for a failed reputation lookup.
fn abuse_error_message(e: &IpWatchError) -> String {
    match e {
        IpWatchError::HttpStatus { status, .. } => format!("API error: {status}"),
        IpWatchError::Timeout { seconds, .. } => format!("request timed out after {seconds}s"),
        IpWatchError::Network { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::AbuseReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted geolocation source.
    pub(crate) struct FakeGeo {
        pub(crate) result: fn() -> Result<Option<GeoResult>>,
        pub(crate) delay: Duration,
    }

    #[async_trait]
    impl GeoLookup for FakeGeo {
        fn name(&self) -> &'static str {
            "fake-geo"
        }
        async fn lookup(&self, _ip: Ipv4Addr) -> Result<Option<GeoResult>> {
            tokio::time::sleep(self.delay).await;
            (self.result)()
        }
    }

    /// Scripted reputation source that counts its calls.
    pub(crate) struct FakeReputation {
        pub(crate) result: fn() -> Result<AbuseReport>,
        pub(crate) delay: Duration,
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl ReputationLookup for FakeReputation {
        fn name(&self) -> &'static str {
            "fake-reputation"
        }
        async fn check(&self, _ip: Ipv4Addr, _credential: &str) -> Result<AbuseReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.result)()
        }
    }

    pub(crate) fn sample_geo() -> Result<Option<GeoResult>> {
        Ok(Some(GeoResult {
            country: Some("Australia".into()),
            city: Some("Brisbane".into()),
            asn: Some("AS13335".into()),
            ..Default::default()
        }))
    }

    pub(crate) fn clean_report() -> Result<AbuseReport> {
        Ok(AbuseReport {
            abuse_score: Some(0),
            reports: Some(0),
            ..Default::default()
        })
    }

    fn enricher(geo: FakeGeo, rep: Arc<FakeReputation>) -> Enricher {
        Enricher::new(Arc::new(geo), rep)
    }

    fn reputation(result: fn() -> Result<AbuseReport>) -> Arc<FakeReputation> {
        Arc::new(FakeReputation {
            result,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn geo(result: fn() -> Result<Option<GeoResult>>) -> FakeGeo {
        FakeGeo {
            result,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn missing_credential_skips_reputation_call() {
        let rep = reputation(clean_report);
        let e = enricher(geo(sample_geo), rep.clone());
        let res = e.enrich("1.1.1.1".parse().unwrap(), None).await;
        assert!(res.geo.is_some());
        assert_eq!(res.abuse.error(), Some(MISSING_CREDENTIAL));
        assert_eq!(rep.calls.load(Ordering::SeqCst), 0);

        let res = e.enrich("1.1.1.1".parse().unwrap(), Some("   ")).await;
        assert_eq!(res.abuse.error(), Some(MISSING_CREDENTIAL));
        assert_eq!(rep.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reputation_failure_keeps_geo() {
        let rep = reputation(|| Err(IpWatchError::http_status("fake", 429)));
        let res = enricher(geo(sample_geo), rep)
            .enrich("1.1.1.1".parse().unwrap(), Some("key"))
            .await;
        assert_eq!(res.geo.unwrap().city.as_deref(), Some("Brisbane"));
        assert_eq!(res.abuse.error(), Some("API error: 429"));
    }

    #[tokio::test]
    async fn geo_failure_keeps_reputation() {
        let rep = reputation(clean_report);
        let res = enricher(
            geo(|| Err(IpWatchError::network("geolocation lookup", "1.1.1.1", "connection refused"))),
            rep,
        )
        .enrich("1.1.1.1".parse().unwrap(), Some("key"))
        .await;
        assert!(res.geo.is_none());
        assert_eq!(res.abuse.report().unwrap().abuse_score, Some(0));
    }

    #[tokio::test]
    async fn transport_error_message_is_inlined() {
        let rep = reputation(|| {
            Err(IpWatchError::network(
                "reputation lookup",
                "1.1.1.1",
                "connection reset by peer",
            ))
        });
        let res = enricher(geo(|| Ok(None)), rep)
            .enrich("1.1.1.1".parse().unwrap(), Some("key"))
            .await;
        assert_eq!(res.abuse.error(), Some("connection reset by peer"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_lookup_is_cut_off() {
        let rep = Arc::new(FakeReputation {
            result: clean_report,
            delay: Duration::from_secs(3600),
            calls: AtomicUsize::new(0),
        });
        let slow_geo = FakeGeo {
            result: sample_geo,
            delay: Duration::from_secs(3600),
        };
        let e = enricher(slow_geo, rep)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(3));
        let res = e.enrich("1.1.1.1".parse().unwrap(), Some("key")).await;
        assert!(res.geo.is_none());
        assert_eq!(res.abuse.error(), Some("request timed out after 3s"));
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_run_concurrently() {
        let rep = Arc::new(FakeReputation {
            result: clean_report,
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let slow_geo = FakeGeo {
            result: sample_geo,
            delay: Duration::from_secs(5),
        };
        let e = enricher(slow_geo, rep)
            .with_timeouts(Duration::from_secs(8), Duration::from_secs(8));
        let started = tokio::time::Instant::now();
        let res = e.enrich("1.1.1.1".parse().unwrap(), Some("key")).await;
        // Sequential execution would take 10s and trip the 8s budget.
        assert!(started.elapsed() < Duration::from_secs(8));
        assert!(res.geo.is_some());
        assert!(res.abuse.report().is_some());
    }
}
