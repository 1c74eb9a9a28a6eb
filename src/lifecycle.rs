//! Tab lifecycle: drop a tab's sightings when the tab closes or the user
//! asks for it.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::model::TabId;
use crate::store::AddressStore;

#[derive(Debug, Clone)]
pub struct TabLifecycle {
    store: AddressStore,
}

impl TabLifecycle {
    pub fn new(store: AddressStore) -> Self {
        Self { store }
    }

    /// Tab-close notification. The deletion runs in the background; the
    /// returned handle can be awaited but nobody has to.
    pub fn on_tab_closed(&self, tab: TabId) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            match store.delete_tab(tab).await {
                Ok(true) => info!(tab = %tab, "tab closed, sightings removed"),
                Ok(false) => debug!(tab = %tab, "tab closed with no sightings"),
                Err(e) => warn!(tab = %tab, error = %e, "failed to remove closed tab"),
            }
        })
    }

    /// Explicit clear. Returns whether the tab had data.
    pub async fn clear_tab(&self, tab: TabId) -> Result<bool> {
        let removed = self.store.delete_tab(tab).await?;
        info!(tab = %tab, removed, "tab data cleared");
        Ok(removed)
    }
}
