//! Node Lifecycle Manager
//!
//! Creates, tracks and kills the nodes hosted by this runtime. The node table
//! lock is held across bind and insertion, so a concurrent kill of the same
//! name never observes a half-created node. Kill tears down membership and
//! hosted bodies under the same write lock.
//!
//! Lock order: nodes, then virtual nodes, then bodies.

use crate::body::BodyTransport;
use crate::events::{EventBus, RuntimeEvent};
use crate::naming::RuntimeHandle;
use crate::registry::{RegisterOutcome, RuntimeRegistry, UnregisterOutcome};
use crate::security::PolicyServerRef;
use crate::sweep::SweepReport;
use crate::url::RuntimeUrl;
use crate::virtual_nodes::{normalize_virtual_node_name, VirtualNodeRegistrar};
use crate::{Result, RuntimeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Job id given to nodes created without one
pub const DEFAULT_JOB_ID: &str = "-";

/// Node creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub replace_if_bound: bool,
    pub policy_server: Option<PolicyServerRef>,
    pub virtual_node: Option<String>,
    pub job_id: String,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replace_if_bound: true,
            policy_server: None,
            virtual_node: None,
            job_id: DEFAULT_JOB_ID.to_string(),
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_virtual_node(mut self, virtual_node: impl Into<String>) -> Self {
        self.virtual_node = Some(virtual_node.into());
        self
    }

    pub fn with_policy_server(mut self, policy_server: PolicyServerRef) -> Self {
        self.policy_server = Some(policy_server);
        self
    }

    pub fn replace_if_bound(mut self, replace: bool) -> Self {
        self.replace_if_bound = replace;
        self
    }
}

/// A node hosted by this runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHandle {
    pub name: String,
    pub url: RuntimeUrl,
    pub owner: RuntimeUrl,
    pub job_id: String,
    pub policy_server: Option<PolicyServerRef>,
    pub virtual_node: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tracked nodes by URL
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: BTreeMap<RuntimeUrl, NodeHandle>,
}

impl NodeTable {
    pub fn get(&self, url: &RuntimeUrl) -> Option<&NodeHandle> {
        self.nodes.get(url)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// URLs of nodes tagged with the given virtual node
    pub fn tagged_with(&self, virtual_node: &str) -> Vec<RuntimeUrl> {
        let key = normalize_virtual_node_name(virtual_node);
        self.nodes
            .values()
            .filter(|node| {
                node.virtual_node
                    .as_deref()
                    .is_some_and(|tag| normalize_virtual_node_name(tag) == key)
            })
            .map(|node| node.url.clone())
            .collect()
    }
}

/// Read access to one node. Holding it keeps the node alive: kill waits
/// until every lease is released.
pub struct NodeLease<'a> {
    _table: RwLockReadGuard<'a, NodeTable>,
    pub node: NodeHandle,
}

pub struct NodeManager {
    registry: Arc<RuntimeRegistry>,
    virtual_nodes: Arc<VirtualNodeRegistrar>,
    bodies: Arc<BodyTransport>,
    events: EventBus,
    table: RwLock<NodeTable>,
    default_virtual_node: parking_lot::RwLock<Option<String>>,
}

impl NodeManager {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        virtual_nodes: Arc<VirtualNodeRegistrar>,
        bodies: Arc<BodyTransport>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            virtual_nodes,
            bodies,
            events,
            table: RwLock::new(NodeTable::default()),
            default_virtual_node: parking_lot::RwLock::new(None),
        }
    }

    /// Create a local node and publish it under its canonical URL.
    ///
    /// Under non-replace mode an existing local node with the same URL is
    /// returned unchanged.
    pub async fn create(&self, spec: NodeSpec, owner: RuntimeHandle) -> Result<NodeHandle> {
        let url = self.registry.node_url(&spec.name)?;
        self.registry.resolve_host(&url).await?;

        let mut table = self.table.write().await;
        if !spec.replace_if_bound {
            if let Some(existing) = table.nodes.get(&url) {
                warn!(node = %url, "Node already exists locally, keeping it");
                return Ok(existing.clone());
            }
        }

        let outcome = self.registry.register(&url, owner, spec.replace_if_bound).await?;
        if outcome == RegisterOutcome::AlreadyBound {
            debug!(node = %url, "Tracking node whose URL is bound elsewhere");
        }

        let virtual_node = spec
            .virtual_node
            .or_else(|| self.default_virtual_node.read().clone());
        let node = NodeHandle {
            name: url.name().to_string(),
            url: url.clone(),
            owner: self.registry.url().clone(),
            job_id: spec.job_id,
            policy_server: spec.policy_server,
            virtual_node,
            created_at: Utc::now(),
        };

        if let Some(previous) = table.nodes.insert(url.clone(), node.clone()) {
            debug!(node = %url, previous_job = %previous.job_id, "Replaced local node state");
            if previous.virtual_node != node.virtual_node {
                self.virtual_nodes.detach(&url).await;
            }
        }
        if let Some(group) = &node.virtual_node {
            self.virtual_nodes.attach(group, &url).await;
        }
        drop(table);

        info!(node = %url, job_id = %node.job_id, "Node created");
        self.events.publish(RuntimeEvent::NodeCreated {
            runtime_url: self.registry.url().clone(),
            node_url: url,
            job_id: node.job_id.clone(),
            virtual_node: node.virtual_node.clone(),
        });
        Ok(node)
    }

    /// Kill a node. Unknown nodes are a no-op returning `None`.
    ///
    /// When the unbind itself fails the node stays tracked and the error is
    /// returned.
    pub async fn kill(&self, name: &str) -> Result<Option<NodeHandle>> {
        let url = self.registry.node_url(name)?;
        let mut table = self.table.write().await;

        let Some(node) = table.nodes.remove(&url) else {
            debug!(node = %url, "Kill of unknown node ignored");
            return Ok(None);
        };

        match self.registry.unregister(&url).await {
            Ok(_) => {
                self.tear_down(&node).await;
                Ok(Some(node))
            }
            Err(e) => {
                table.nodes.insert(url, node);
                Err(e)
            }
        }
    }

    /// Kill every tracked node; each one is attempted.
    ///
    /// A tracked node that is no longer bound is torn down and reported as a
    /// `NotBound` failure.
    pub async fn kill_all(&self) -> SweepReport {
        let mut table = self.table.write().await;
        let urls: Vec<RuntimeUrl> = table.nodes.keys().cloned().collect();
        let mut report = SweepReport::new();

        for url in urls {
            let Some(node) = table.nodes.remove(&url) else {
                continue;
            };
            match self.registry.unregister(&url).await {
                Ok(UnregisterOutcome::Unbound) => {
                    self.tear_down(&node).await;
                    report.record_success(url.to_string());
                }
                Ok(UnregisterOutcome::WasAbsent) => {
                    warn!(node = %url, "Tracked node was not bound");
                    self.tear_down(&node).await;
                    report.record_failure(url.to_string(), RuntimeError::not_bound(&url));
                }
                Err(e) => {
                    warn!(node = %url, error = %e, "Failed to kill node");
                    table.nodes.insert(url.clone(), node);
                    report.record_failure(url.to_string(), e);
                }
            }
        }

        if !report.is_clean() {
            warn!(%report, "Node sweep finished with failures");
        }
        report
    }

    /// Hold the node table for reading while working on one node
    pub async fn lease(&self, name: &str) -> Result<NodeLease<'_>> {
        let url = self.registry.node_url(name)?;
        let table = self.table.read().await;
        let node = table
            .nodes
            .get(&url)
            .cloned()
            .ok_or_else(|| RuntimeError::unknown_node(&url))?;
        Ok(NodeLease {
            _table: table,
            node,
        })
    }

    /// Read access to the whole table
    pub async fn table(&self) -> RwLockReadGuard<'_, NodeTable> {
        self.table.read().await
    }

    pub async fn node(&self, name: &str) -> Result<NodeHandle> {
        Ok(self.lease(name).await?.node)
    }

    /// Names of the local nodes, sorted by URL
    pub async fn local_node_names(&self) -> Vec<String> {
        self.table
            .read()
            .await
            .nodes
            .values()
            .map(|node| node.name.clone())
            .collect()
    }

    pub async fn job_id(&self, name: &str) -> Result<String> {
        Ok(self.node(name).await?.job_id)
    }

    pub async fn virtual_node_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self.node(name).await?.virtual_node)
    }

    pub async fn policy_server(&self, name: &str) -> Result<Option<PolicyServerRef>> {
        Ok(self.node(name).await?.policy_server)
    }

    /// Tag every untagged node, and every later untagged creation, with
    /// `virtual_node`
    pub async fn set_default_virtual_node(&self, virtual_node: &str) {
        *self.default_virtual_node.write() = Some(virtual_node.to_string());

        let mut table = self.table.write().await;
        for node in table.nodes.values_mut() {
            if node.virtual_node.is_none() {
                node.virtual_node = Some(virtual_node.to_string());
                self.virtual_nodes.attach(virtual_node, &node.url).await;
            }
        }
        debug!(virtual_node, "Default virtual node name set");
    }

    /// Membership and bodies go with the node
    async fn tear_down(&self, node: &NodeHandle) {
        self.virtual_nodes.detach(&node.url).await;
        let evicted = self.bodies.evict_node(&node.url).await;

        info!(node = %node.url, bodies = evicted.len(), "Node killed");
        self.events.publish(RuntimeEvent::NodeKilled {
            runtime_url: self.registry.url().clone(),
            node_url: node.url.clone(),
        });
    }
}
