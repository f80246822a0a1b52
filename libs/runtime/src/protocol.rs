//! Remote Runtime Protocol
//!
//! Every operation a peer may invoke on a runtime. `ActiveRuntime` implements
//! it in process; an RPC client stub implements the same trait, so naming
//! bindings resolve to `Arc<dyn RemoteRuntime>` regardless of where the
//! runtime lives.

use crate::acquaintances::PeerRuntime;
use crate::body::{Body, BodyHandle, BodyId, Checkpoint, ConstructorCall};
use crate::naming::RuntimeHandle;
use crate::nodes::NodeSpec;
use crate::registry::{RegisterOutcome, UnregisterOutcome};
use crate::runtime::{RuntimeInfo, ShutdownReport};
use crate::security::{Certificate, Entity, PolicyServerRef, SecurityContext};
use crate::sweep::SweepReport;
use crate::url::RuntimeUrl;
use crate::virtual_nodes::VirtualNodeGroup;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RemoteRuntime: Send + Sync {
    /// Canonical URL of this runtime
    fn url(&self) -> &RuntimeUrl;

    async fn runtime_info(&self) -> Result<RuntimeInfo>;

    // Registry

    /// Bind `url` to this runtime
    async fn register(&self, url: &RuntimeUrl, replace_if_bound: bool) -> Result<RegisterOutcome>;

    async fn unregister(&self, url: &RuntimeUrl) -> Result<UnregisterOutcome>;

    // Nodes

    /// Returns the URL of the created node
    async fn create_local_node(&self, spec: NodeSpec) -> Result<RuntimeUrl>;

    /// Unknown nodes are a no-op
    async fn kill_node(&self, name: &str) -> Result<()>;

    async fn kill_all_nodes(&self) -> Result<SweepReport>;

    async fn local_node_names(&self) -> Result<Vec<String>>;

    async fn job_id(&self, node: &str) -> Result<String>;

    async fn virtual_node_name(&self, node: &str) -> Result<Option<String>>;

    async fn node_policy_server(&self, node: &str) -> Result<Option<PolicyServerRef>>;

    async fn set_default_node_virtual_node_name(&self, name: &str) -> Result<()>;

    // Virtual nodes

    /// Returns the URL the group is bound under
    async fn register_virtual_node(&self, name: &str, replace_if_bound: bool) -> Result<RuntimeUrl>;

    /// Unknown names are a no-op
    async fn unregister_virtual_node(&self, name: &str) -> Result<()>;

    async fn unregister_all_virtual_nodes(&self) -> Result<SweepReport>;

    async fn virtual_node(&self, name: &str) -> Result<Option<VirtualNodeGroup>>;

    // Peers and acquaintances

    async fn register_runtime(&self, peer: PeerRuntime) -> Result<()>;

    async fn unregister_runtime(&self, name: &str) -> Result<()>;

    async fn runtimes(&self) -> Result<Vec<PeerRuntime>>;

    async fn runtime(&self, name: &str) -> Result<Option<PeerRuntime>>;

    async fn add_acquaintance(&self, peer: &str) -> Result<()>;

    async fn remove_acquaintance(&self, peer: &str) -> Result<()>;

    async fn acquaintances(&self) -> Result<Vec<String>>;

    async fn set_parent(&self, parent: RuntimeUrl) -> Result<()>;

    // Bodies

    async fn create_body(
        &self,
        node: &str,
        call: ConstructorCall,
        is_node_local: bool,
    ) -> Result<BodyHandle>;

    /// Accept a migrating body; its id is kept
    async fn receive_body(&self, node: &str, body: Body) -> Result<BodyHandle>;

    /// Apply a checkpoint if `sequence` is newer than the last applied one
    async fn receive_checkpoint(
        &self,
        node: &str,
        checkpoint: Checkpoint,
        sequence: u64,
    ) -> Result<BodyHandle>;

    /// Ship a local body to `target_node` on `target`
    async fn migrate_body(
        &self,
        body_id: BodyId,
        target: RuntimeHandle,
        target_node: &str,
    ) -> Result<BodyHandle>;

    async fn active_objects(&self, node: &str) -> Result<Vec<BodyHandle>>;

    async fn active_objects_of_class(
        &self,
        node: &str,
        class_name: &str,
    ) -> Result<Vec<BodyHandle>>;

    async fn body_state(&self, body_id: BodyId) -> Result<Body>;

    // Security

    async fn get_policy(&self, context: SecurityContext) -> Result<SecurityContext>;

    async fn get_certificate(&self) -> Result<Option<Certificate>>;

    async fn policy_server(&self) -> Result<Option<PolicyServerRef>>;

    async fn node_certificate(&self, node: &str) -> Result<Option<Certificate>>;

    async fn entities(&self, node: &str) -> Result<Vec<Entity>>;

    async fn runtime_entities(&self) -> Result<Vec<Entity>>;

    /// Entities of the node hosting `body_id`
    async fn body_entities(&self, body_id: BodyId) -> Result<Vec<Entity>>;

    // Lifecycle

    /// Kill all nodes, unregister all virtual nodes, then unbind the runtime
    async fn kill_runtime(&self) -> Result<ShutdownReport>;
}
