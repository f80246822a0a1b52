//! Virtual Node Registrar
//!
//! Named groups of nodes, each bound under its own URL. Groups are keyed by
//! their normalized name so `vg-A`, `vg-A_VN` and `pa://host:1099/vg-A_VN`
//! all address the same entry.

use crate::events::{EventBus, RuntimeEvent};
use crate::naming::RuntimeHandle;
use crate::registry::{RuntimeRegistry, UnregisterOutcome};
use crate::sweep::SweepReport;
use crate::url::RuntimeUrl;
use crate::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Suffix some callers append to virtual node names
pub const VN_SUFFIX: &str = "_VN";

/// Strip a URL prefix and the `_VN` suffix from a virtual node name
pub fn normalize_virtual_node_name(name: &str) -> &str {
    let last = name.rsplit('/').next().unwrap_or(name);
    last.strip_suffix(VN_SUFFIX).unwrap_or(last)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNodeGroup {
    pub name: String,
    pub url: RuntimeUrl,
    /// Member node URLs in join order
    pub members: Vec<RuntimeUrl>,
}

pub struct VirtualNodeRegistrar {
    registry: Arc<RuntimeRegistry>,
    events: EventBus,
    groups: RwLock<BTreeMap<String, VirtualNodeGroup>>,
}

impl VirtualNodeRegistrar {
    pub fn new(registry: Arc<RuntimeRegistry>, events: EventBus) -> Self {
        Self {
            registry,
            events,
            groups: RwLock::new(BTreeMap::new()),
        }
    }

    /// Bind a group and start tracking it.
    ///
    /// `members` are the local nodes already tagged with this group. Under
    /// replace an existing group keeps its members.
    pub async fn register(
        &self,
        name: &str,
        replace_if_bound: bool,
        owner: RuntimeHandle,
        members: Vec<RuntimeUrl>,
    ) -> Result<VirtualNodeGroup> {
        let key = normalize_virtual_node_name(name).to_string();
        let url = self.registry.node_url(name)?;
        self.registry.resolve_host(&url).await?;

        let mut groups = self.groups.write().await;
        self.registry.register(&url, owner, replace_if_bound).await?;

        let group = groups.entry(key.clone()).or_insert_with(|| VirtualNodeGroup {
            name: key.clone(),
            url: url.clone(),
            members: Vec::new(),
        });
        group.url = url.clone();
        for member in members {
            if !group.members.contains(&member) {
                group.members.push(member);
            }
        }
        let group = group.clone();
        drop(groups);

        info!(virtual_node = %key, %url, members = group.members.len(), "Virtual node registered");
        self.events.publish(RuntimeEvent::VirtualNodeRegistered {
            runtime_url: self.registry.url().clone(),
            name: key,
            url,
        });
        Ok(group)
    }

    /// Drop tracking and unbind. An unknown group unbinds the URL built from
    /// `name`, which normally reports `WasAbsent`.
    pub async fn unregister(&self, name: &str) -> Result<UnregisterOutcome> {
        let key = normalize_virtual_node_name(name).to_string();
        let mut groups = self.groups.write().await;

        let removed = groups.remove(&key);
        let url = match &removed {
            Some(group) => group.url.clone(),
            None => self.registry.node_url(name)?,
        };

        match self.registry.unregister(&url).await {
            Ok(outcome) => {
                drop(groups);
                if removed.is_some() {
                    info!(virtual_node = %key, %url, "Virtual node unregistered");
                    self.events.publish(RuntimeEvent::VirtualNodeUnregistered {
                        runtime_url: self.registry.url().clone(),
                        name: key,
                    });
                } else {
                    debug!(virtual_node = %key, "Unregister of untracked virtual node");
                }
                Ok(outcome)
            }
            Err(e) => {
                if let Some(group) = removed {
                    groups.insert(key, group);
                }
                Err(e)
            }
        }
    }

    /// Unregister every tracked group; each one is attempted
    pub async fn unregister_all(&self) -> SweepReport {
        let tracked: Vec<(String, RuntimeUrl)> = self
            .groups
            .read()
            .await
            .iter()
            .map(|(name, group)| (name.clone(), group.url.clone()))
            .collect();
        let mut report = SweepReport::new();

        for (name, url) in tracked {
            match self.unregister(&name).await {
                Ok(UnregisterOutcome::Unbound) => report.record_success(name),
                Ok(UnregisterOutcome::WasAbsent) => {
                    warn!(virtual_node = %name, %url, "Tracked virtual node was not bound");
                    report.record_failure(name, RuntimeError::not_bound(&url));
                }
                Err(e) => {
                    warn!(virtual_node = %name, error = %e, "Failed to unregister virtual node");
                    report.record_failure(name, e);
                }
            }
        }
        report
    }

    /// Add a node to a tracked group; unknown groups are ignored
    pub async fn attach(&self, group_name: &str, node_url: &RuntimeUrl) -> bool {
        let key = normalize_virtual_node_name(group_name);
        let mut groups = self.groups.write().await;
        match groups.get_mut(key) {
            Some(group) if !group.members.contains(node_url) => {
                debug!(virtual_node = %key, node = %node_url, "Node joined virtual node");
                group.members.push(node_url.clone());
                true
            }
            _ => false,
        }
    }

    /// Remove a node from every group it belongs to
    pub async fn detach(&self, node_url: &RuntimeUrl) {
        let mut groups = self.groups.write().await;
        for group in groups.values_mut() {
            group.members.retain(|member| member != node_url);
        }
    }

    pub async fn get(&self, name: &str) -> Option<VirtualNodeGroup> {
        self.groups
            .read()
            .await
            .get(normalize_virtual_node_name(name))
            .cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.groups.read().await.keys().cloned().collect()
    }
}
