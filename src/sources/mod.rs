//! External enrichment sources.
//!
//! Two independent, differently-shaped services feed an enrichment:
//!   * a geolocation source (`geo`), queried without credentials
//!   * an abuse-reputation source (`reputation`), which needs an API key
//!
//! Each is abstracted behind a small async trait so the orchestrator
//! (`crate::enrich`) can run them concurrently and tests can swap in fakes.
//! Sources report failures as `IpWatchError`; turning those into absent geo
//! data or abuse error markers is the orchestrator's job, not theirs.

pub mod geo;
pub mod reputation;

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{IpWatchError, Result};
use crate::model::{AbuseReport, GeoResult};

pub use geo::IpApiSource;
pub use reputation::AbuseIpDbSource;

/// Geolocation lookup. `Ok(None)` means the source answered but had no data
/// for this address (e.g. a non-`success` status).
#[async_trait]
pub trait GeoLookup: Send + Sync {
    fn name(&self) -> &'static str;
    async fn lookup(&self, ip: Ipv4Addr) -> Result<Option<GeoResult>>;
}

/// Abuse-reputation lookup, authenticated with a caller-supplied credential.
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self, ip: Ipv4Addr, credential: &str) -> Result<AbuseReport>;
}

/// Shared HTTP client for the HTTP-backed sources.
pub fn build_http_client(user_agent: &str, connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| IpWatchError::internal_with("failed to build HTTP client", e))
}
