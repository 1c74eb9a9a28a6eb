use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::enrich::Enricher;
use crate::errors::Result;
use crate::extract::Extractor;
use crate::lifecycle::TabLifecycle;
use crate::messages::{Request, Response, ScanSummary};
use crate::model::{EnrichmentPatch, EnrichmentResult, TabId, TabRecords};
use crate::netutil::parse_ipv4;
use crate::store::{AddressStore, JsonFileBackend, MergeOutcome};

/// Enrichments in flight per (tab, ip). Overlapping requests for the same
/// pair each hold a count.
type InFlightSet = Arc<Mutex<HashMap<(TabId, Ipv4Addr), usize>>>;

/// High-level façade wiring the store, the enrichment orchestrator, the tab
/// lifecycle and the page extractor together.
///
/// This is the background service of the browser integration: it answers
/// [`Request`] envelopes and is also what the CLI drives directly. It owns
/// the only piece of non-durable state, the set of (tab, address) pairs
/// with an enrichment in flight, which surfaces as `loading` on reads.
#[derive(Debug, Clone)]
pub struct IpWatch {
    store: AddressStore,
    enricher: Enricher,
    lifecycle: TabLifecycle,
    extractor: Extractor,
    in_flight: InFlightSet,
}

/// Marks a (tab, ip) pair in flight until the last overlapping guard drops.
struct InFlightGuard {
    set: InFlightSet,
    key: (TabId, Ipv4Addr),
}

impl InFlightGuard {
    fn enter(set: &InFlightSet, tab: TabId, ip: Ipv4Addr) -> Self {
        *set.lock().entry((tab, ip)).or_insert(0) += 1;
        Self {
            set: set.clone(),
            key: (tab, ip),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock();
        if let Some(count) = set.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                set.remove(&self.key);
            }
        }
    }
}

impl IpWatch {
    pub fn new(store: AddressStore, enricher: Enricher, extractor: Extractor) -> Self {
        let lifecycle = TabLifecycle::new(store.clone());
        Self {
            store,
            enricher,
            lifecycle,
            extractor,
            in_flight: Arc::default(),
        }
    }

    /// Build the service from configuration. A configured state file selects
    /// the JSON file backend, otherwise state lives in memory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = match &config.storage.state_file {
            Some(path) => AddressStore::spawn(JsonFileBackend::new(path)),
            None => AddressStore::in_memory(),
        };
        let enricher = Enricher::from_config(&config.network)?;
        let extractor = Extractor::new(config.policy()?);
        Ok(Self::new(store, enricher, extractor))
    }

    pub fn store(&self) -> &AddressStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &TabLifecycle {
        &self.lifecycle
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Extract public addresses from page content and record them against
    /// the tab. Returns the addresses found (nothing is written when empty).
    pub async fn ingest_page(&self, tab: TabId, url: &str, content: &str) -> Result<Vec<Ipv4Addr>> {
        let ips = self.extractor.extract(content);
        if ips.is_empty() {
            debug!(tab = %tab, url, "no public addresses on page");
            return Ok(ips);
        }
        let created = self.store.record_sightings(tab, &ips, url).await?;
        info!(tab = %tab, url, found = ips.len(), created, "page scanned");
        Ok(ips)
    }

    /// Tab records with `loading` set for addresses being enriched.
    pub async fn tab_records(&self, tab: TabId) -> TabRecords {
        let mut records = self.store.get_tab_records(tab).await;
        let in_flight = self.in_flight.lock();
        for (ip, record) in records.iter_mut() {
            record.loading = in_flight.contains_key(&(tab, *ip));
        }
        records
    }

    /// Enrich without touching the store.
    pub async fn lookup(&self, ip: Ipv4Addr) -> EnrichmentResult {
        let credential = match self.store.credential().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "reading credential failed");
                None
            }
        };
        self.enricher.enrich(ip, credential.as_deref()).await
    }

    /// Enrich one address and merge the result into the tab's record.
    pub async fn enrich_and_merge(
        &self,
        tab: TabId,
        ip: Ipv4Addr,
    ) -> Result<(EnrichmentResult, MergeOutcome)> {
        let _guard = InFlightGuard::enter(&self.in_flight, tab, ip);
        let result = self.lookup(ip).await;
        let outcome = self
            .store
            .merge_enrichment(tab, ip, EnrichmentPatch::from(result.clone()))
            .await?;
        Ok((result, outcome))
    }

    /// Enrich every record of the tab missing geo or abuse data, one at a
    /// time in address order, merging each result as it arrives.
    pub async fn scan_tab(&self, tab: TabId) -> Result<ScanSummary> {
        let pending: Vec<Ipv4Addr> = self
            .store
            .get_tab_records(tab)
            .await
            .into_values()
            .filter(|r| r.needs_enrichment())
            .map(|r| r.ip)
            .collect();

        let mut summary = ScanSummary::default();
        for ip in pending {
            let (_, outcome) = self.enrich_and_merge(tab, ip).await?;
            summary.scanned += 1;
            match outcome {
                MergeOutcome::Applied => summary.merged += 1,
                MergeOutcome::Dropped => summary.dropped += 1,
            }
        }
        info!(
            tab = %tab,
            scanned = summary.scanned,
            merged = summary.merged,
            dropped = summary.dropped,
            "tab scan finished"
        );
        Ok(summary)
    }

    pub async fn save_api_key(&self, key: &str) -> Result<()> {
        self.store.set_credential(key).await?;
        info!(configured = !key.trim().is_empty(), "reputation API key updated");
        Ok(())
    }

    /// Answer one request envelope. `TAB_CLOSED` yields no response.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        debug!(tab = ?request.tab(), "handling request");
        let response = match request {
            Request::IpsFound { tab_id, ips, url } => {
                match ips.iter().map(|s| parse_ipv4(s)).collect::<Result<Vec<_>>>() {
                    Ok(ips) => self
                        .store
                        .record_sightings(tab_id, &ips, url)
                        .await
                        .map(|_| Response::Ack),
                    Err(e) => Err(e),
                }
            }
            Request::EnrichIp { ip, tab_id } => match parse_ipv4(&ip) {
                Ok(ip) => match tab_id {
                    Some(tab) => self
                        .enrich_and_merge(tab, ip)
                        .await
                        .map(|(result, outcome)| Response::enrichment(result, Some(outcome))),
                    None => Ok(Response::enrichment(self.lookup(ip).await, None)),
                },
                Err(e) => Err(e),
            },
            Request::GetTabIps { tab_id } => {
                Ok(Response::tab_ips(self.tab_records(tab_id).await))
            }
            Request::ClearData { tab_id } => {
                self.lifecycle.clear_tab(tab_id).await.map(|_| Response::Ack)
            }
            Request::SaveApiKey { api_key } => {
                self.save_api_key(&api_key).await.map(|_| Response::Ack)
            }
            Request::TabClosed { tab_id } => {
                self.lifecycle.on_tab_closed(tab_id);
                return None;
            }
            Request::ScanTab { tab_id } => self.scan_tab(tab_id).await.map(Response::ScanSummary),
        };
        Some(response.unwrap_or_else(|e| {
            warn!(error = %e, category = ?e.category(), "request failed");
            Response::error(e.to_string())
        }))
    }
}
