//! Acquaintance Directory
//!
//! Known peer runtimes this runtime can address. Acquaintances are names
//! only; registered peers additionally carry a handle. Neither implies
//! ownership of the peer process, and no call here performs I/O.

use crate::naming::RuntimeHandle;
use crate::protocol::RemoteRuntime;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use tracing::debug;

/// A peer runtime that registered itself with this runtime
#[derive(Clone)]
pub struct PeerRuntime {
    pub name: String,
    pub handle: RuntimeHandle,
    pub creator_id: String,
    pub creation_protocol: String,
    pub vm_name: String,
    pub registered_at: DateTime<Utc>,
}

impl PeerRuntime {
    pub fn new(
        name: impl Into<String>,
        handle: RuntimeHandle,
        creator_id: impl Into<String>,
        creation_protocol: impl Into<String>,
        vm_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            creator_id: creator_id.into(),
            creation_protocol: creation_protocol.into(),
            vm_name: vm_name.into(),
            registered_at: Utc::now(),
        }
    }
}

impl fmt::Debug for PeerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRuntime")
            .field("name", &self.name)
            .field("url", self.handle.url())
            .field("creator_id", &self.creator_id)
            .field("creation_protocol", &self.creation_protocol)
            .field("vm_name", &self.vm_name)
            .finish()
    }
}

#[derive(Default)]
pub struct AcquaintanceDirectory {
    /// Insertion-ordered, duplicate-free
    acquaintances: RwLock<Vec<String>>,
    peers: DashMap<String, PeerRuntime>,
}

impl AcquaintanceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the peer was already known
    pub fn add_acquaintance(&self, peer: &str) -> bool {
        let mut acquaintances = self.acquaintances.write();
        if acquaintances.iter().any(|known| known == peer) {
            return false;
        }
        debug!(peer, "Adding acquaintance");
        acquaintances.push(peer.to_string());
        true
    }

    /// Returns false when the peer was unknown
    pub fn remove_acquaintance(&self, peer: &str) -> bool {
        let mut acquaintances = self.acquaintances.write();
        let before = acquaintances.len();
        acquaintances.retain(|known| known != peer);
        before != acquaintances.len()
    }

    pub fn acquaintances(&self) -> Vec<String> {
        self.acquaintances.read().clone()
    }

    /// Register (or replace) a peer runtime
    pub fn register_runtime(&self, peer: PeerRuntime) -> Option<PeerRuntime> {
        debug!(peer = %peer.name, url = %peer.handle.url(), "Registering peer runtime");
        self.peers.insert(peer.name.clone(), peer)
    }

    pub fn unregister_runtime(&self, name: &str) -> Option<PeerRuntime> {
        self.peers.remove(name).map(|(_, peer)| peer)
    }

    pub fn runtime(&self, name: &str) -> Option<PeerRuntime> {
        self.peers.get(name).map(|entry| entry.value().clone())
    }

    /// Registered peers sorted by name
    pub fn runtimes(&self) -> Vec<PeerRuntime> {
        let mut peers: Vec<_> = self.peers.iter().map(|entry| entry.value().clone()).collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::InMemoryNaming;
    use crate::testing;

    #[test]
    fn test_acquaintances_keep_order_without_duplicates() {
        let directory = AcquaintanceDirectory::new();
        assert!(directory.add_acquaintance("R2"));
        assert!(directory.add_acquaintance("R3"));
        assert!(!directory.add_acquaintance("R2"));

        assert_eq!(directory.acquaintances(), vec!["R2", "R3"]);

        assert!(directory.remove_acquaintance("R2"));
        assert!(!directory.remove_acquaintance("R2"));
        assert_eq!(directory.acquaintances(), vec!["R3"]);
    }

    #[tokio::test]
    async fn test_peer_registration_replaces_by_name() {
        let naming = InMemoryNaming::new();
        let r2 = testing::runtime("R2", &naming).await;
        let r3 = testing::runtime("R3", &naming).await;
        let directory = AcquaintanceDirectory::new();

        assert!(directory
            .register_runtime(PeerRuntime::new("peer", r2, "creator", "local", "vm-a"))
            .is_none());
        let replaced =
            directory.register_runtime(PeerRuntime::new("peer", r3, "creator", "local", "vm-b"));
        assert_eq!(replaced.unwrap().vm_name, "vm-a");

        let current = directory.runtime("peer").unwrap();
        assert_eq!(current.handle.url().name(), "R3");
        assert_eq!(directory.runtimes().len(), 1);

        assert!(directory.unregister_runtime("peer").is_some());
        assert!(directory.runtime("peer").is_none());
    }
}
