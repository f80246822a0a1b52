//! Naming Facility
//!
//! Capability over an external lookup/bind service. Bindings map canonical
//! URLs to runtime handles; resolving a node or virtual-node URL yields the
//! runtime hosting it.

use crate::protocol::RemoteRuntime;
use crate::url::RuntimeUrl;
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// Handle published in the naming facility
pub type RuntimeHandle = Arc<dyn RemoteRuntime>;

/// Lookup/bind service consumed by the runtime registry.
///
/// Each call is atomic on its own; nothing is transactional across calls.
#[async_trait]
pub trait NamingFacility: Send + Sync {
    /// Bind `url`; fails with `NameConflict` when already bound
    async fn bind(&self, url: &RuntimeUrl, handle: RuntimeHandle) -> Result<()>;

    /// Bind `url`, replacing any previous binding
    async fn rebind(&self, url: &RuntimeUrl, handle: RuntimeHandle) -> Result<()>;

    /// Remove `url`; fails with `NotBound` when absent
    async fn unbind(&self, url: &RuntimeUrl) -> Result<()>;

    /// Look up `url`; fails with `NotBound` when absent
    async fn resolve(&self, url: &RuntimeUrl) -> Result<RuntimeHandle>;

    /// All bound URLs
    async fn list(&self) -> Result<Vec<RuntimeUrl>>;
}

/// Process-local naming facility shared by every runtime holding a clone
#[derive(Default, Clone)]
pub struct InMemoryNaming {
    bindings: Arc<RwLock<HashMap<RuntimeUrl, RuntimeHandle>>>,
}

impl InMemoryNaming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bindings
    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bindings.read().await.is_empty()
    }

    pub async fn contains(&self, url: &RuntimeUrl) -> bool {
        self.bindings.read().await.contains_key(url)
    }
}

impl std::fmt::Debug for InMemoryNaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryNaming").finish_non_exhaustive()
    }
}

#[async_trait]
impl NamingFacility for InMemoryNaming {
    async fn bind(&self, url: &RuntimeUrl, handle: RuntimeHandle) -> Result<()> {
        let mut bindings = self.bindings.write().await;
        if bindings.contains_key(url) {
            return Err(RuntimeError::name_conflict(url));
        }
        trace!(%url, "bind");
        bindings.insert(url.clone(), handle);
        Ok(())
    }

    async fn rebind(&self, url: &RuntimeUrl, handle: RuntimeHandle) -> Result<()> {
        trace!(%url, "rebind");
        self.bindings.write().await.insert(url.clone(), handle);
        Ok(())
    }

    async fn unbind(&self, url: &RuntimeUrl) -> Result<()> {
        trace!(%url, "unbind");
        self.bindings
            .write()
            .await
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_bound(url))
    }

    async fn resolve(&self, url: &RuntimeUrl) -> Result<RuntimeHandle> {
        self.bindings
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| RuntimeError::not_bound(url))
    }

    async fn list(&self) -> Result<Vec<RuntimeUrl>> {
        let mut urls: Vec<_> = self.bindings.read().await.keys().cloned().collect();
        urls.sort();
        Ok(urls)
    }
}
