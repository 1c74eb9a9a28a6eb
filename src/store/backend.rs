//! Durable key-value backends for the address store.
//!
//! A backend reads whole per-tab snapshots and the credential string, and
//! applies each mutation as one read-modify-write step. Inside a process the
//! store's writer task already serializes those steps; the file backend also
//! holds an exclusive lock on a sibling `.lock` file for the duration of each
//! step, so several processes can share one state file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{IoResultExt, IpWatchError, Result};
use crate::model::{TabAddressMap, TabId, TabRecords};

/// Persistence layer used by [`super::AddressStore`].
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Latest persisted snapshot for a tab, if any.
    async fn load_tab(&self, tab: TabId) -> Result<Option<TabRecords>>;

    /// Read-modify-write of one tab. `apply` receives the current snapshot
    /// (`None` for an unknown tab) and returns whether it changed it; a
    /// changed snapshot is written back before any other writer reads the
    /// tab again.
    async fn update_tab(
        &self,
        tab: TabId,
        apply: &mut (dyn for<'s> FnMut(&'s mut Option<TabRecords>) -> bool + Send),
    ) -> Result<()>;

    /// Remove a tab entirely. Returns whether an entry existed.
    async fn remove_tab(&self, tab: TabId) -> Result<bool>;

    async fn load_credential(&self) -> Result<Option<String>>;

    /// Store (`Some`) or clear (`None`) the reputation credential.
    async fn save_credential(&self, credential: Option<&str>) -> Result<()>;
}

/// Process-local backend. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<StateDocument>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_tab(&self, tab: TabId) -> Result<Option<TabRecords>> {
        Ok(self.state.lock().ip_data_by_tab.get(&tab).cloned())
    }

    async fn update_tab(
        &self,
        tab: TabId,
        apply: &mut (dyn for<'s> FnMut(&'s mut Option<TabRecords>) -> bool + Send),
    ) -> Result<()> {
        let mut state = self.state.lock();
        let mut slot = state.ip_data_by_tab.remove(&tab);
        apply(&mut slot);
        if let Some(records) = slot {
            state.ip_data_by_tab.insert(tab, records);
        }
        Ok(())
    }

    async fn remove_tab(&self, tab: TabId) -> Result<bool> {
        Ok(self.state.lock().ip_data_by_tab.remove(&tab).is_some())
    }

    async fn load_credential(&self) -> Result<Option<String>> {
        Ok(self.state.lock().api_key.clone())
    }

    async fn save_credential(&self, credential: Option<&str>) -> Result<()> {
        self.state.lock().api_key = credential.map(str::to_string);
        Ok(())
    }
}

/// On-disk layout: every tab's mapping plus the credential, in one JSON file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    #[serde(default)]
    ip_data_by_tab: TabAddressMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

/// Exclusive advisory lock on the state file's `.lock` sibling. Released
/// when dropped.
struct StateLock {
    file: File,
}

impl StateLock {
    fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Single JSON file backend. Writes go to a uniquely named temp file in the
/// same directory which is then renamed over the previous file, so readers
/// never see a truncated document.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut lock = self.path.clone().into_os_string();
        lock.push(".lock");
        PathBuf::from(lock)
    }

    /// Block (off the runtime threads) until this process owns the state file.
    async fn lock(&self) -> Result<StateLock> {
        let dir = self.dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_path(dir.display().to_string(), "create directory")?;
        let path = self.lock_path();
        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || StateLock::acquire(&path))
            .await
            .map_err(|e| IpWatchError::internal_with("state lock task failed", e))?
            .with_path(display, "lock")
    }

    async fn read_document(&self) -> Result<StateDocument> {
        let display = self.path.display().to_string();
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(StateDocument::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| IpWatchError::serialization(format!("state file {display}"), e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StateDocument::default()),
            Err(e) => Err(IpWatchError::io(display, "read", e)),
        }
    }

    /// Callers hold the [`StateLock`].
    async fn write_document(&self, doc: &StateDocument) -> Result<()> {
        let display = self.path.display().to_string();
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| IpWatchError::serialization(format!("state file {display}"), e))?;
        let len = bytes.len();
        let dir = self.dir();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.persist(&path).map(|_| ()).map_err(|e| e.error)
        })
        .await
        .map_err(|e| IpWatchError::internal_with("state file writer task failed", e))?
        .with_path(display, "write")?;
        debug!(path = %self.path.display(), bytes = len, "state file written");
        Ok(())
    }
}

#[async_trait]
impl KvBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn load_tab(&self, tab: TabId) -> Result<Option<TabRecords>> {
        Ok(self.read_document().await?.ip_data_by_tab.remove(&tab))
    }

    async fn update_tab(
        &self,
        tab: TabId,
        apply: &mut (dyn for<'s> FnMut(&'s mut Option<TabRecords>) -> bool + Send),
    ) -> Result<()> {
        let _lock = self.lock().await?;
        let mut doc = self.read_document().await?;
        let mut slot = doc.ip_data_by_tab.remove(&tab);
        if !apply(&mut slot) {
            return Ok(());
        }
        if let Some(records) = slot {
            doc.ip_data_by_tab.insert(tab, records);
        }
        self.write_document(&doc).await
    }

    async fn remove_tab(&self, tab: TabId) -> Result<bool> {
        let _lock = self.lock().await?;
        let mut doc = self.read_document().await?;
        if doc.ip_data_by_tab.remove(&tab).is_none() {
            return Ok(false);
        }
        self.write_document(&doc).await?;
        Ok(true)
    }

    async fn load_credential(&self) -> Result<Option<String>> {
        Ok(self.read_document().await?.api_key)
    }

    async fn save_credential(&self, credential: Option<&str>) -> Result<()> {
        let _lock = self.lock().await?;
        let mut doc = self.read_document().await?;
        doc.api_key = credential.map(str::to_string);
        self.write_document(&doc).await
    }
}
