//! Active Runtime
//!
//! One `ActiveRuntime` per process identity. It owns the node, virtual node
//! and body tables, binds itself and its nodes in the injected naming
//! facility, and answers the `RemoteRuntime` protocol in process.
//!
//! ## Locking
//!
//! Tables are locked in a fixed order: nodes, then virtual nodes, then
//! bodies. Body operations hold a node lease for their whole duration, so a
//! kill of the hosting node waits for them. No lock is held while calling
//! another runtime.

use crate::acquaintances::{AcquaintanceDirectory, PeerRuntime};
use crate::body::{
    Body, BodyConstructor, BodyHandle, BodyId, BodyTransport, Checkpoint, ConstructorCall,
    ConstructorRegistry,
};
use crate::events::{EventBus, MigrationDirection, RuntimeEvent};
use crate::naming::{NamingFacility, RuntimeHandle};
use crate::nodes::{NodeHandle, NodeManager, NodeSpec};
use crate::protocol::RemoteRuntime;
use crate::registry::{RegisterOutcome, RuntimeIdentity, RuntimeRegistry, UnregisterOutcome};
use crate::security::{
    Certificate, Entity, PolicyEvaluator, PolicyServerRef, SecurityContext, SecurityRelay,
};
use crate::sweep::SweepReport;
use crate::url::{HostResolver, RuntimeUrl, SystemResolver};
use crate::virtual_nodes::{VirtualNodeGroup, VirtualNodeRegistrar};
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use runtime_config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopping,
    Stopped,
}

/// Description of a runtime process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub name: String,
    pub url: RuntimeUrl,
    pub host: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub parent: Option<RuntimeUrl>,
}

/// Outcome of the teardown cascade. Every stage runs; each keeps its own
/// result.
#[derive(Debug)]
pub struct ShutdownReport {
    pub nodes: SweepReport,
    pub virtual_nodes: SweepReport,
    /// Unbind of the runtime's own URL
    pub runtime: Result<UnregisterOutcome>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.nodes.is_clean() && self.virtual_nodes.is_clean() && self.runtime.is_ok()
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nodes: {}; virtual nodes: {}; ", self.nodes, self.virtual_nodes)?;
        match &self.runtime {
            Ok(outcome) => write!(f, "runtime: {:?}", outcome),
            Err(e) => write!(f, "runtime unbind failed: {}", e),
        }
    }
}

/// Builder for an `ActiveRuntime`
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    naming: Arc<dyn NamingFacility>,
    resolver: Arc<dyn HostResolver>,
    constructors: ConstructorRegistry,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    certificate: Option<Certificate>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig, naming: Arc<dyn NamingFacility>) -> Self {
        Self {
            config,
            naming,
            resolver: Arc::new(SystemResolver),
            constructors: ConstructorRegistry::new(),
            evaluator: None,
            certificate: None,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Register a constructor for `class_name`
    pub fn constructor(
        mut self,
        class_name: impl Into<String>,
        constructor: Arc<dyn BodyConstructor>,
    ) -> Self {
        self.constructors.register(class_name, constructor);
        self
    }

    pub fn constructors(mut self, constructors: ConstructorRegistry) -> Self {
        self.constructors = constructors;
        self
    }

    pub fn security_manager(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Certificate of the creator of this runtime
    pub fn certificate(mut self, certificate: Certificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Bind the runtime, then create the configured virtual nodes and nodes
    pub async fn start(self) -> Result<Arc<ActiveRuntime>> {
        self.config
            .validate()
            .map_err(|e| RuntimeError::config(e.to_string()))?;

        let identity = RuntimeIdentity::from_settings(&self.config.runtime);
        let registry = Arc::new(RuntimeRegistry::new(
            identity,
            self.naming,
            self.resolver,
            self.config.naming.strict_registration,
        )?);
        let parent = self
            .config
            .runtime
            .parent
            .as_deref()
            .map(RuntimeUrl::parse)
            .transpose()?;

        let events = EventBus::new(self.config.events.channel_capacity);
        let bodies = Arc::new(BodyTransport::new(self.constructors));
        let virtual_nodes = Arc::new(VirtualNodeRegistrar::new(registry.clone(), events.clone()));
        let nodes = NodeManager::new(
            registry.clone(),
            virtual_nodes.clone(),
            bodies.clone(),
            events.clone(),
        );
        let security = SecurityRelay::new(
            self.evaluator,
            self.certificate,
            self.config.security.policy_server.clone().map(PolicyServerRef::new),
        );

        let runtime = Arc::new_cyclic(|self_ref| ActiveRuntime {
            self_ref: self_ref.clone(),
            url: registry.url().clone(),
            registry,
            nodes,
            virtual_nodes,
            bodies,
            acquaintances: AcquaintanceDirectory::new(),
            security,
            events,
            state: RwLock::new(LifecycleState::Running),
            parent: RwLock::new(parent),
            started_at: Utc::now(),
        });

        runtime
            .registry
            .register(&runtime.url, runtime.clone(), false)
            .await?;
        info!(runtime = %runtime.url, "Runtime started");
        runtime.events.publish(RuntimeEvent::RuntimeStarted {
            runtime_url: runtime.url.clone(),
        });

        for name in &self.config.virtual_nodes {
            runtime.register_virtual_node(name, true).await?;
        }
        for node in &self.config.nodes {
            let mut spec = NodeSpec::new(&node.name)
                .with_job_id(&node.job_id)
                .replace_if_bound(node.replace);
            if let Some(virtual_node) = &node.virtual_node {
                spec = spec.with_virtual_node(virtual_node);
            }
            runtime.create_local_node(spec).await?;
        }

        Ok(runtime)
    }
}

pub struct ActiveRuntime {
    self_ref: Weak<ActiveRuntime>,
    url: RuntimeUrl,
    registry: Arc<RuntimeRegistry>,
    nodes: NodeManager,
    virtual_nodes: Arc<VirtualNodeRegistrar>,
    bodies: Arc<BodyTransport>,
    acquaintances: AcquaintanceDirectory,
    security: SecurityRelay,
    events: EventBus,
    state: RwLock<LifecycleState>,
    parent: RwLock<Option<RuntimeUrl>>,
    started_at: DateTime<Utc>,
}

impl ActiveRuntime {
    pub fn builder(config: RuntimeConfig, naming: Arc<dyn NamingFacility>) -> RuntimeBuilder {
        RuntimeBuilder::new(config, naming)
    }

    /// Start with default resolver, no constructors and no security manager
    pub async fn start(
        config: RuntimeConfig,
        naming: Arc<dyn NamingFacility>,
    ) -> Result<Arc<Self>> {
        RuntimeBuilder::new(config, naming).start().await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn constructors(&self) -> &ConstructorRegistry {
        self.bodies.constructors()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Install or replace the security manager
    pub fn set_security_manager(&self, evaluator: Arc<dyn PolicyEvaluator>) {
        self.security.set_security_manager(evaluator);
    }

    /// Handle to this runtime as peers see it
    fn handle(&self) -> Result<RuntimeHandle> {
        let runtime: Arc<ActiveRuntime> = self
            .self_ref
            .upgrade()
            .ok_or_else(|| RuntimeError::shut_down(&self.url))?;
        Ok(runtime)
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.read() {
            LifecycleState::Running => Ok(()),
            _ => Err(RuntimeError::shut_down(&self.url)),
        }
    }

    /// Runtime, then virtual node if tagged, then the node itself
    fn node_entities(&self, node: NodeHandle) -> Vec<Entity> {
        let mut entities = vec![Entity::Runtime {
            url: self.url.clone(),
        }];
        if let Some(name) = node.virtual_node {
            entities.push(Entity::VirtualNode { name });
        }
        entities.push(Entity::Node {
            url: node.url,
            job_id: node.job_id,
        });
        entities
    }
}

impl fmt::Debug for ActiveRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRuntime")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl RemoteRuntime for ActiveRuntime {
    fn url(&self) -> &RuntimeUrl {
        &self.url
    }

    async fn runtime_info(&self) -> Result<RuntimeInfo> {
        let identity = self.registry.identity();
        Ok(RuntimeInfo {
            name: identity.process_name.clone(),
            url: self.url.clone(),
            host: identity.host.clone(),
            pid: std::process::id(),
            started_at: self.started_at,
            parent: self.parent.read().clone(),
        })
    }

    async fn register(&self, url: &RuntimeUrl, replace_if_bound: bool) -> Result<RegisterOutcome> {
        self.ensure_running()?;
        self.registry.register(url, self.handle()?, replace_if_bound).await
    }

    async fn unregister(&self, url: &RuntimeUrl) -> Result<UnregisterOutcome> {
        self.registry.unregister(url).await
    }

    async fn create_local_node(&self, spec: NodeSpec) -> Result<RuntimeUrl> {
        self.ensure_running()?;
        let node = self.nodes.create(spec, self.handle()?).await?;
        Ok(node.url)
    }

    async fn kill_node(&self, name: &str) -> Result<()> {
        self.nodes.kill(name).await?;
        Ok(())
    }

    async fn kill_all_nodes(&self) -> Result<SweepReport> {
        Ok(self.nodes.kill_all().await)
    }

    async fn local_node_names(&self) -> Result<Vec<String>> {
        Ok(self.nodes.local_node_names().await)
    }

    async fn job_id(&self, node: &str) -> Result<String> {
        self.nodes.job_id(node).await
    }

    async fn virtual_node_name(&self, node: &str) -> Result<Option<String>> {
        self.nodes.virtual_node_name(node).await
    }

    async fn node_policy_server(&self, node: &str) -> Result<Option<PolicyServerRef>> {
        self.nodes.policy_server(node).await
    }

    async fn set_default_node_virtual_node_name(&self, name: &str) -> Result<()> {
        self.ensure_running()?;
        self.nodes.set_default_virtual_node(name).await;
        Ok(())
    }

    async fn register_virtual_node(
        &self,
        name: &str,
        replace_if_bound: bool,
    ) -> Result<RuntimeUrl> {
        self.ensure_running()?;
        let handle = self.handle()?;

        // Holding the node table keeps tagged creations from slipping past
        let table = self.nodes.table().await;
        let members = table.tagged_with(name);
        let group = self
            .virtual_nodes
            .register(name, replace_if_bound, handle, members)
            .await?;
        drop(table);

        Ok(group.url)
    }

    async fn unregister_virtual_node(&self, name: &str) -> Result<()> {
        self.virtual_nodes.unregister(name).await?;
        Ok(())
    }

    async fn unregister_all_virtual_nodes(&self) -> Result<SweepReport> {
        Ok(self.virtual_nodes.unregister_all().await)
    }

    async fn virtual_node(&self, name: &str) -> Result<Option<VirtualNodeGroup>> {
        Ok(self.virtual_nodes.get(name).await)
    }

    async fn register_runtime(&self, peer: PeerRuntime) -> Result<()> {
        self.ensure_running()?;
        let peer_name = peer.name.clone();
        if let Some(previous) = self.acquaintances.register_runtime(peer) {
            debug!(peer = %peer_name, previous = %previous.handle.url(), "Peer runtime replaced");
        }
        self.events.publish(RuntimeEvent::PeerRegistered {
            runtime_url: self.url.clone(),
            peer_name,
        });
        Ok(())
    }

    async fn unregister_runtime(&self, name: &str) -> Result<()> {
        if self.acquaintances.unregister_runtime(name).is_some() {
            self.events.publish(RuntimeEvent::PeerUnregistered {
                runtime_url: self.url.clone(),
                peer_name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn runtimes(&self) -> Result<Vec<PeerRuntime>> {
        Ok(self.acquaintances.runtimes())
    }

    async fn runtime(&self, name: &str) -> Result<Option<PeerRuntime>> {
        Ok(self.acquaintances.runtime(name))
    }

    async fn add_acquaintance(&self, peer: &str) -> Result<()> {
        self.acquaintances.add_acquaintance(peer);
        Ok(())
    }

    async fn remove_acquaintance(&self, peer: &str) -> Result<()> {
        self.acquaintances.remove_acquaintance(peer);
        Ok(())
    }

    async fn acquaintances(&self) -> Result<Vec<String>> {
        Ok(self.acquaintances.acquaintances())
    }

    async fn set_parent(&self, parent: RuntimeUrl) -> Result<()> {
        debug!(runtime = %self.url, %parent, "Parent runtime set");
        *self.parent.write() = Some(parent);
        Ok(())
    }

    async fn create_body(
        &self,
        node: &str,
        call: ConstructorCall,
        is_node_local: bool,
    ) -> Result<BodyHandle> {
        self.ensure_running()?;
        let lease = self.nodes.lease(node).await?;
        let (handle, body) = self
            .bodies
            .create_body(&lease.node.url, &call, is_node_local)
            .await?;
        drop(lease);

        self.events.publish(RuntimeEvent::BodyCreated {
            body_id: handle.id,
            node_url: handle.node_url.clone(),
            class_name: body.class_name,
        });
        Ok(handle)
    }

    async fn receive_body(&self, node: &str, body: Body) -> Result<BodyHandle> {
        self.ensure_running()?;
        let lease = self.nodes.lease(node).await?;
        let handle = self.bodies.receive_body(&lease.node.url, body).await?;
        drop(lease);

        self.events.publish(RuntimeEvent::BodyMigrated {
            body_id: handle.id,
            node_url: handle.node_url.clone(),
            direction: MigrationDirection::Inbound,
        });
        Ok(handle)
    }

    async fn receive_checkpoint(
        &self,
        node: &str,
        checkpoint: Checkpoint,
        sequence: u64,
    ) -> Result<BodyHandle> {
        self.ensure_running()?;
        let lease = self.nodes.lease(node).await?;
        let handle = self
            .bodies
            .receive_checkpoint(&lease.node.url, checkpoint, sequence)
            .await?;
        drop(lease);

        self.events.publish(RuntimeEvent::CheckpointApplied {
            body_id: handle.id,
            node_url: handle.node_url.clone(),
            sequence,
        });
        Ok(handle)
    }

    async fn migrate_body(
        &self,
        body_id: BodyId,
        target: RuntimeHandle,
        target_node: &str,
    ) -> Result<BodyHandle> {
        self.ensure_running()?;
        let (body, from) = self.bodies.begin_migration(body_id).await?;

        match target.receive_body(target_node, body).await {
            Ok(handle) => {
                // A move within this runtime was already re-homed by receive_body
                if target.url() != &self.url {
                    self.bodies.complete_migration(body_id).await;
                }
                info!(%body_id, from = %from, to = %handle.node_url, "Body migrated");
                self.events.publish(RuntimeEvent::BodyMigrated {
                    body_id,
                    node_url: from,
                    direction: MigrationDirection::Outbound,
                });
                Ok(handle)
            }
            Err(e) => {
                warn!(
                    %body_id,
                    target = %target.url(),
                    error = %e,
                    "Migration failed, body restored"
                );
                self.bodies.abort_migration(body_id).await;
                Err(e)
            }
        }
    }

    async fn active_objects(&self, node: &str) -> Result<Vec<BodyHandle>> {
        let lease = self.nodes.lease(node).await?;
        Ok(self.bodies.active_objects(&lease.node.url).await)
    }

    async fn active_objects_of_class(
        &self,
        node: &str,
        class_name: &str,
    ) -> Result<Vec<BodyHandle>> {
        let lease = self.nodes.lease(node).await?;
        Ok(self
            .bodies
            .active_objects_of_class(&lease.node.url, class_name)
            .await)
    }

    async fn body_state(&self, body_id: BodyId) -> Result<Body> {
        self.bodies
            .body(body_id)
            .await
            .ok_or(RuntimeError::UnknownBody { body_id })
    }

    async fn get_policy(&self, context: SecurityContext) -> Result<SecurityContext> {
        self.security.get_policy(context)
    }

    async fn get_certificate(&self) -> Result<Option<Certificate>> {
        Ok(self.security.certificate())
    }

    async fn policy_server(&self) -> Result<Option<PolicyServerRef>> {
        Ok(self.security.policy_server())
    }

    async fn node_certificate(&self, node: &str) -> Result<Option<Certificate>> {
        self.nodes.lease(node).await?;
        Ok(self.security.certificate())
    }

    async fn entities(&self, node: &str) -> Result<Vec<Entity>> {
        let node = self.nodes.node(node).await?;
        Ok(self.node_entities(node))
    }

    async fn runtime_entities(&self) -> Result<Vec<Entity>> {
        Ok(vec![Entity::Runtime {
            url: self.url.clone(),
        }])
    }

    async fn body_entities(&self, body_id: BodyId) -> Result<Vec<Entity>> {
        let table = self.nodes.table().await;
        let handle = self
            .bodies
            .locate(body_id)
            .await
            .ok_or(RuntimeError::UnknownBody { body_id })?;
        let node = table
            .get(&handle.node_url)
            .cloned()
            .ok_or_else(|| RuntimeError::unknown_node(&handle.node_url))?;
        drop(table);
        Ok(self.node_entities(node))
    }

    async fn kill_runtime(&self) -> Result<ShutdownReport> {
        {
            let mut state = self.state.write();
            if *state == LifecycleState::Running {
                *state = LifecycleState::Stopping;
            }
        }
        info!(runtime = %self.url, "Killing runtime");

        let nodes = self.nodes.kill_all().await;
        let virtual_nodes = self.virtual_nodes.unregister_all().await;
        let runtime = self.registry.unregister(&self.url).await;
        if let Err(e) = &runtime {
            warn!(runtime = %self.url, error = %e, "Failed to unbind runtime");
        }

        let was_running = {
            let mut state = self.state.write();
            let was_running = *state != LifecycleState::Stopped;
            *state = LifecycleState::Stopped;
            was_running
        };

        let report = ShutdownReport {
            nodes,
            virtual_nodes,
            runtime,
        };
        if was_running {
            if report.is_clean() {
                info!(runtime = %self.url, %report, "Runtime stopped");
            } else {
                warn!(runtime = %self.url, %report, "Runtime stopped with cleanup failures");
            }
            self.events.publish(RuntimeEvent::RuntimeStopped {
                runtime_url: self.url.clone(),
            });
        }
        Ok(report)
    }
}
