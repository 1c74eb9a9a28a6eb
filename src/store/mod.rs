//! Tab-scoped address store.
//!
//! All mutations are funnelled through one writer task that owns the
//! [`KvBackend`]. Each command reads the latest persisted snapshot for its
//! tab, applies its delta and writes the result back before the next command
//! is taken off the queue, so concurrent extraction passes and enrichment
//! merges never clobber each other. Stores in other processes sharing a
//! state file are kept apart by the file backend's lock.
//!
//! ```ignore
//! let store = AddressStore::in_memory();
//! store.record_sightings(TabId(7), &[ip], "https://example.com").await?;
//! let records = store.get_tab_records(TabId(7)).await;
//! ```

pub mod backend;

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{IpWatchError, Result};
use crate::model::{EnrichmentPatch, SightingRecord, TabId, TabRecords, now_millis};

pub use backend::{JsonFileBackend, KvBackend, MemoryBackend};

/// Commands queued for the writer task.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Result of an enrichment merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The record existed and was updated.
    Applied,
    /// The tab or record was gone (cleared mid-flight); nothing was written.
    Dropped,
}

impl MergeOutcome {
    pub fn is_applied(self) -> bool {
        self == MergeOutcome::Applied
    }
}

enum StoreCommand {
    RecordSightings {
        tab: TabId,
        ips: Vec<Ipv4Addr>,
        source_url: String,
        respond: oneshot::Sender<Result<usize>>,
    },
    GetTab {
        tab: TabId,
        respond: oneshot::Sender<Result<TabRecords>>,
    },
    MergeEnrichment {
        tab: TabId,
        ip: Ipv4Addr,
        patch: EnrichmentPatch,
        respond: oneshot::Sender<Result<MergeOutcome>>,
    },
    DeleteTab {
        tab: TabId,
        respond: oneshot::Sender<Result<bool>>,
    },
    GetCredential {
        respond: oneshot::Sender<Result<Option<String>>>,
    },
    SetCredential {
        credential: Option<String>,
        respond: oneshot::Sender<Result<()>>,
    },
}

/// Handle to the store's writer task. Cheap to clone; the task stops once the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct AddressStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl std::fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreCommand::RecordSightings { .. } => "RecordSightings",
            StoreCommand::GetTab { .. } => "GetTab",
            StoreCommand::MergeEnrichment { .. } => "MergeEnrichment",
            StoreCommand::DeleteTab { .. } => "DeleteTab",
            StoreCommand::GetCredential { .. } => "GetCredential",
            StoreCommand::SetCredential { .. } => "SetCredential",
        };
        f.write_str(name)
    }
}

impl AddressStore {
    /// Spawn the writer task on the current tokio runtime.
    pub fn spawn<B: KvBackend>(backend: B) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        debug!(backend = backend.name(), "starting address store");
        tokio::spawn(run_writer(backend, rx));
        Self { tx }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::spawn(MemoryBackend::new())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreCommand,
    ) -> Result<T> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| IpWatchError::StoreClosed)?;
        rx.await.map_err(|_| IpWatchError::StoreClosed)?
    }

    /// Record one sighting. Idempotent for a repeated (tab, ip, url) triple.
    pub async fn record_sighting(
        &self,
        tab: TabId,
        ip: Ipv4Addr,
        source_url: impl Into<String>,
    ) -> Result<usize> {
        self.record_sightings(tab, &[ip], source_url).await
    }

    /// Record a batch of sightings from one page as a single mutation.
    /// Returns how many records were newly created.
    pub async fn record_sightings(
        &self,
        tab: TabId,
        ips: &[Ipv4Addr],
        source_url: impl Into<String>,
    ) -> Result<usize> {
        let ips = ips.to_vec();
        let source_url = source_url.into();
        self.request(|respond| StoreCommand::RecordSightings {
            tab,
            ips,
            source_url,
            respond,
        })
        .await
    }

    /// Copy of the tab's mapping; empty when the tab is unknown or the
    /// snapshot cannot be read.
    pub async fn get_tab_records(&self, tab: TabId) -> TabRecords {
        match self
            .request(|respond| StoreCommand::GetTab { tab, respond })
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(tab = %tab, error = %e, "reading tab records failed");
                TabRecords::new()
            }
        }
    }

    /// Shallow-merge enrichment data into an existing record. A missing tab
    /// or record yields [`MergeOutcome::Dropped`] and writes nothing.
    pub async fn merge_enrichment(
        &self,
        tab: TabId,
        ip: Ipv4Addr,
        patch: EnrichmentPatch,
    ) -> Result<MergeOutcome> {
        self.request(|respond| StoreCommand::MergeEnrichment {
            tab,
            ip,
            patch,
            respond,
        })
        .await
    }

    /// Remove the tab's whole mapping. Returns whether anything was removed.
    pub async fn delete_tab(&self, tab: TabId) -> Result<bool> {
        self.request(|respond| StoreCommand::DeleteTab { tab, respond })
            .await
    }

    /// The reputation-source credential, if configured.
    pub async fn credential(&self) -> Result<Option<String>> {
        self.request(|respond| StoreCommand::GetCredential { respond })
            .await
    }

    /// Persist the credential; a blank key clears it.
    pub async fn set_credential(&self, credential: &str) -> Result<()> {
        let trimmed = credential.trim();
        let credential = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self.request(|respond| StoreCommand::SetCredential {
            credential,
            respond,
        })
        .await
    }
}

async fn run_writer<B: KvBackend>(backend: B, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            StoreCommand::RecordSightings {
                tab,
                ips,
                source_url,
                respond,
            } => {
                let _ = respond.send(apply_sightings(&backend, tab, &ips, &source_url).await);
            }
            StoreCommand::GetTab { tab, respond } => {
                let res = backend.load_tab(tab).await.map(Option::unwrap_or_default);
                let _ = respond.send(res);
            }
            StoreCommand::MergeEnrichment {
                tab,
                ip,
                patch,
                respond,
            } => {
                let _ = respond.send(apply_merge(&backend, tab, ip, patch).await);
            }
            StoreCommand::DeleteTab { tab, respond } => {
                let res = backend.remove_tab(tab).await;
                if let Ok(removed) = res {
                    debug!(tab = %tab, removed, "tab deleted");
                }
                let _ = respond.send(res);
            }
            StoreCommand::GetCredential { respond } => {
                let _ = respond.send(backend.load_credential().await);
            }
            StoreCommand::SetCredential {
                credential,
                respond,
            } => {
                let _ = respond.send(backend.save_credential(credential.as_deref()).await);
            }
        }
    }
    debug!(backend = backend.name(), "address store stopped");
}

async fn apply_sightings<B: KvBackend>(
    backend: &B,
    tab: TabId,
    ips: &[Ipv4Addr],
    source_url: &str,
) -> Result<usize> {
    if ips.is_empty() {
        return Ok(0);
    }
    let now = now_millis();
    let mut created = 0;
    let mut total = 0;

    backend
        .update_tab(tab, &mut |slot| {
            let records = slot.get_or_insert_with(TabRecords::new);
            let mut changed = false;
            created = 0;
            for ip in ips {
                match records.get_mut(ip) {
                    Some(existing) => changed |= existing.add_source(source_url),
                    None => {
                        records.insert(*ip, SightingRecord::new(*ip, source_url, now));
                        created += 1;
                        changed = true;
                    }
                }
            }
            total = records.len();
            changed
        })
        .await?;

    debug!(tab = %tab, created, total, url = source_url, "sightings recorded");
    Ok(created)
}

async fn apply_merge<B: KvBackend>(
    backend: &B,
    tab: TabId,
    ip: Ipv4Addr,
    patch: EnrichmentPatch,
) -> Result<MergeOutcome> {
    let mut patch = Some(patch);
    let mut outcome = MergeOutcome::Dropped;

    backend
        .update_tab(tab, &mut |slot| {
            let Some(record) = slot.as_mut().and_then(|records| records.get_mut(&ip)) else {
                return false;
            };
            if let Some(patch) = patch.take() {
                record.apply(patch);
            }
            outcome = MergeOutcome::Applied;
            true
        })
        .await?;

    if outcome == MergeOutcome::Dropped {
        debug!(tab = %tab, ip = %ip, "merge dropped: tab or record no longer exists");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AbuseResult, GeoResult};

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn repeated_sighting_is_idempotent() {
        let store = AddressStore::in_memory();
        let tab = TabId(1);
        assert_eq!(
            store
                .record_sighting(tab, ip("8.8.8.8"), "https://example.com")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .record_sighting(tab, ip("8.8.8.8"), "https://example.com")
                .await
                .unwrap(),
            0
        );
        let records = store.get_tab_records(tab).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[&ip("8.8.8.8")].sources, vec!["https://example.com"]);
    }

    #[tokio::test]
    async fn sources_accumulate_in_first_seen_order() {
        let store = AddressStore::in_memory();
        let tab = TabId(1);
        let addr = ip("8.8.8.8");
        store.record_sighting(tab, addr, "https://b.example").await.unwrap();
        let first_seen = store.get_tab_records(tab).await[&addr].first_seen;
        store.record_sighting(tab, addr, "https://a.example").await.unwrap();
        store.record_sighting(tab, addr, "https://b.example").await.unwrap();

        let rec = &store.get_tab_records(tab).await[&addr];
        assert_eq!(rec.sources, vec!["https://b.example", "https://a.example"]);
        assert_eq!(rec.first_seen, first_seen);
    }

    #[tokio::test]
    async fn resighting_keeps_enrichment() {
        let store = AddressStore::in_memory();
        let tab = TabId(2);
        let addr = ip("1.1.1.1");
        store.record_sighting(tab, addr, "https://a.example").await.unwrap();
        let outcome = store
            .merge_enrichment(
                tab,
                addr,
                EnrichmentPatch {
                    geo: Some(GeoResult {
                        country: Some("Australia".into()),
                        ..Default::default()
                    }),
                    abuse: Some(AbuseResult::failed("API key not configured")),
                    last_checked: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Applied);

        store.record_sighting(tab, addr, "https://b.example").await.unwrap();
        let rec = &store.get_tab_records(tab).await[&addr];
        assert_eq!(rec.sources.len(), 2);
        assert_eq!(
            rec.geo.as_ref().and_then(|g| g.country.as_deref()),
            Some("Australia")
        );
        assert!(rec.abuse.is_some());
        assert_eq!(rec.last_checked, Some(5));
    }

    #[tokio::test]
    async fn unknown_tab_reads_empty() {
        let store = AddressStore::in_memory();
        assert!(store.get_tab_records(TabId(99)).await.is_empty());
        assert!(!store.delete_tab(TabId(99)).await.unwrap());
    }

    #[tokio::test]
    async fn empty_batch_does_not_create_tab() {
        let backend = MemoryBackend::new();
        assert_eq!(
            apply_sightings(&backend, TabId(4), &[], "https://x.example")
                .await
                .unwrap(),
            0
        );
        assert!(backend.load_tab(TabId(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merge_after_delete_is_dropped() {
        let store = AddressStore::in_memory();
        let tab = TabId(3);
        let addr = ip("9.9.9.9");
        store.record_sighting(tab, addr, "https://a.example").await.unwrap();
        assert!(store.delete_tab(tab).await.unwrap());

        let outcome = store
            .merge_enrichment(
                tab,
                addr,
                EnrichmentPatch {
                    abuse: Some(AbuseResult::failed("late")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Dropped);
        assert!(store.get_tab_records(tab).await.is_empty());
    }

    #[tokio::test]
    async fn merge_for_unknown_ip_is_dropped() {
        let store = AddressStore::in_memory();
        let tab = TabId(3);
        store
            .record_sighting(tab, ip("9.9.9.9"), "https://a.example")
            .await
            .unwrap();
        let outcome = store
            .merge_enrichment(tab, ip("8.8.4.4"), EnrichmentPatch::default())
            .await
            .unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(store.get_tab_records(tab).await.len(), 1);
    }

    #[tokio::test]
    async fn tabs_are_isolated() {
        let store = AddressStore::in_memory();
        let addr = ip("8.8.8.8");
        store.record_sighting(TabId(1), addr, "https://one.example").await.unwrap();
        store.record_sighting(TabId(2), addr, "https://two.example").await.unwrap();

        store.delete_tab(TabId(1)).await.unwrap();
        assert!(store.get_tab_records(TabId(1)).await.is_empty());
        let other = store.get_tab_records(TabId(2)).await;
        assert_eq!(other[&addr].sources, vec!["https://two.example"]);
    }

    #[tokio::test]
    async fn concurrent_passes_lose_no_updates() {
        let store = AddressStore::in_memory();
        let tab = TabId(5);
        let mut handles = Vec::new();
        for i in 0..32u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let addrs = [Ipv4Addr::new(8, 8, 8, i), Ipv4Addr::new(1, 1, 1, 1)];
                store
                    .record_sightings(tab, &addrs, format!("https://page{i}.example"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let records = store.get_tab_records(tab).await;
        assert_eq!(records.len(), 33);
        assert_eq!(records[&ip("1.1.1.1")].sources.len(), 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_state_file_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let writers = [
            AddressStore::spawn(JsonFileBackend::new(&path)),
            AddressStore::spawn(JsonFileBackend::new(&path)),
        ];
        let tab = TabId(8);

        let mut handles = Vec::new();
        for i in 0..40u8 {
            let store = writers[usize::from(i % 2)].clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_sighting(tab, Ipv4Addr::new(8, 8, 8, i), "https://example.com")
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 1);
        }

        let reopened = AddressStore::spawn(JsonFileBackend::new(&path));
        assert_eq!(reopened.get_tab_records(tab).await.len(), 40);
    }

    #[tokio::test]
    async fn credential_roundtrip_and_clear() {
        let store = AddressStore::in_memory();
        assert_eq!(store.credential().await.unwrap(), None);
        store.set_credential("  abc123 ").await.unwrap();
        assert_eq!(store.credential().await.unwrap().as_deref(), Some("abc123"));
        store.set_credential("   ").await.unwrap();
        assert_eq!(store.credential().await.unwrap(), None);
    }
}
