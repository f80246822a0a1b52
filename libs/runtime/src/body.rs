//! Body Transport
//!
//! Hosts active-object bodies on local nodes. Bodies arrive three ways:
//! constructed here, migrated in from a peer, or restored from a checkpoint.
//! A body keeps its `BodyId` through every one of them.
//!
//! ```text
//! Uncreated ──create/receive──▶ Active ──begin_migration──▶ MigratingOut
//!                                 ▲  │                          │
//!                       checkpoint└──┘          abort ◀─────────┤
//!                                                complete ──▶ (gone here)
//! ```

use crate::error::BoxError;
use crate::url::RuntimeUrl;
use crate::{Result, RuntimeError};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Globally unique, migration-stable body identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(Uuid);

impl BodyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BodyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body-{}", self.0.simple())
    }
}

/// Where a body lives, as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyHandle {
    pub id: BodyId,
    pub node_url: RuntimeUrl,
    pub is_local: bool,
}

/// Transportable active-object body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub id: BodyId,
    pub class_name: String,
    pub state: Bytes,
}

/// Serialized state snapshot used for fault recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub body_id: BodyId,
    pub class_name: String,
    pub state: Bytes,
}

impl Checkpoint {
    pub fn of(body: &Body) -> Self {
        Self {
            body_id: body.id,
            class_name: body.class_name.clone(),
            state: body.state.clone(),
        }
    }
}

/// Construction request: class plus arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorCall {
    pub class_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ConstructorCall {
    pub fn new(class_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            class_name: class_name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyStatus {
    Active,
    MigratingOut,
}

/// Builds the initial state of an active object
pub trait BodyConstructor: Send + Sync {
    fn construct(&self, args: &serde_json::Value) -> std::result::Result<Bytes, BoxError>;
}

impl<F> BodyConstructor for F
where
    F: Fn(&serde_json::Value) -> std::result::Result<Bytes, BoxError> + Send + Sync,
{
    fn construct(&self, args: &serde_json::Value) -> std::result::Result<Bytes, BoxError> {
        self(args)
    }
}

/// Constructors by class name
#[derive(Default, Clone)]
pub struct ConstructorRegistry {
    constructors: Arc<DashMap<String, Arc<dyn BodyConstructor>>>,
}

impl ConstructorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, class_name: impl Into<String>, constructor: Arc<dyn BodyConstructor>) {
        self.constructors.insert(class_name.into(), constructor);
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<dyn BodyConstructor>> {
        self.constructors.get(class_name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<_> = self
            .constructors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        classes.sort();
        classes
    }
}

#[derive(Debug, Clone)]
struct HostedBody {
    body: Body,
    node_url: RuntimeUrl,
    is_local: bool,
    status: BodyStatus,
}

impl HostedBody {
    fn handle(&self) -> BodyHandle {
        BodyHandle {
            id: self.body.id,
            node_url: self.node_url.clone(),
            is_local: self.is_local,
        }
    }
}

/// Bodies and checkpoint sequences share one lock so that the staleness
/// check and the state replacement happen atomically.
#[derive(Debug, Default)]
struct BodyTable {
    bodies: HashMap<BodyId, HostedBody>,
    /// Last applied checkpoint sequence per body; survives migration out
    sequences: HashMap<BodyId, u64>,
}

/// Hosts bodies on the nodes of one runtime.
///
/// Node existence is checked by the caller, which holds the node lease for
/// the duration of each call.
pub struct BodyTransport {
    constructors: ConstructorRegistry,
    table: RwLock<BodyTable>,
}

impl BodyTransport {
    pub fn new(constructors: ConstructorRegistry) -> Self {
        Self {
            constructors,
            table: RwLock::new(BodyTable::default()),
        }
    }

    pub fn constructors(&self) -> &ConstructorRegistry {
        &self.constructors
    }

    /// Instantiate a new body on `node_url`
    pub async fn create_body(
        &self,
        node_url: &RuntimeUrl,
        call: &ConstructorCall,
        is_node_local: bool,
    ) -> Result<(BodyHandle, Body)> {
        let constructor = self.constructors.get(&call.class_name).ok_or_else(|| {
            RuntimeError::construction_failed(
                &call.class_name,
                "no constructor registered for class",
            )
        })?;

        let state = constructor.construct(&call.args).map_err(|e| {
            warn!(class = %call.class_name, node = %node_url, "Constructor call failed: {}", e);
            RuntimeError::construction_failed(&call.class_name, e)
        })?;

        let body = Body {
            id: BodyId::new(),
            class_name: call.class_name.clone(),
            state,
        };
        let hosted = HostedBody {
            body: body.clone(),
            node_url: node_url.clone(),
            is_local: is_node_local,
            status: BodyStatus::Active,
        };
        let handle = hosted.handle();

        self.table.write().await.bodies.insert(body.id, hosted);
        debug!(body_id = %body.id, class = %body.class_name, node = %node_url, "Body created");
        Ok((handle, body))
    }

    /// Accept a body migrating in; its id is preserved
    pub async fn receive_body(&self, node_url: &RuntimeUrl, body: Body) -> Result<BodyHandle> {
        let hosted = HostedBody {
            node_url: node_url.clone(),
            is_local: true,
            status: BodyStatus::Active,
            body,
        };
        let handle = hosted.handle();

        let mut table = self.table.write().await;
        if let Some(previous) = table.bodies.insert(handle.id, hosted) {
            debug!(
                body_id = %handle.id,
                previous_node = %previous.node_url,
                "Received body replaces a local copy"
            );
        }
        info!(body_id = %handle.id, node = %node_url, "Body received");
        Ok(handle)
    }

    /// Apply a checkpoint; only strictly newer sequences are accepted
    pub async fn receive_checkpoint(
        &self,
        node_url: &RuntimeUrl,
        checkpoint: Checkpoint,
        sequence: u64,
    ) -> Result<BodyHandle> {
        let mut table = self.table.write().await;
        let body_id = checkpoint.body_id;

        if let Some(&last_applied) = table.sequences.get(&body_id) {
            if sequence <= last_applied {
                warn!(%body_id, sequence, last_applied, "Rejecting stale checkpoint");
                return Err(RuntimeError::StaleCheckpoint {
                    body_id,
                    received: sequence,
                    last_applied,
                });
            }
        }
        // A body being shipped out must not be revived under the shipment
        if let Some(hosted) = table.bodies.get(&body_id) {
            if hosted.status == BodyStatus::MigratingOut {
                warn!(%body_id, sequence, "Rejecting checkpoint for body in migration");
                return Err(RuntimeError::MigrationInProgress { body_id });
            }
        }
        table.sequences.insert(body_id, sequence);

        let hosted = table.bodies.entry(body_id).or_insert_with(|| HostedBody {
            body: Body {
                id: body_id,
                class_name: checkpoint.class_name.clone(),
                state: Bytes::new(),
            },
            node_url: node_url.clone(),
            is_local: true,
            status: BodyStatus::Active,
        });
        hosted.body.class_name = checkpoint.class_name;
        hosted.body.state = checkpoint.state;
        hosted.node_url = node_url.clone();
        hosted.status = BodyStatus::Active;

        debug!(%body_id, sequence, node = %node_url, "Checkpoint applied");
        Ok(hosted.handle())
    }

    /// Mark a body as leaving and hand out the copy to ship
    pub async fn begin_migration(&self, body_id: BodyId) -> Result<(Body, RuntimeUrl)> {
        let mut table = self.table.write().await;
        let hosted = table
            .bodies
            .get_mut(&body_id)
            .ok_or(RuntimeError::UnknownBody { body_id })?;

        if hosted.status == BodyStatus::MigratingOut {
            return Err(RuntimeError::MigrationInProgress { body_id });
        }
        hosted.status = BodyStatus::MigratingOut;
        Ok((hosted.body.clone(), hosted.node_url.clone()))
    }

    /// Drop the local copy once the target accepted it
    pub async fn complete_migration(&self, body_id: BodyId) {
        self.table.write().await.bodies.remove(&body_id);
    }

    /// Return the body to service after a failed shipment
    pub async fn abort_migration(&self, body_id: BodyId) {
        if let Some(hosted) = self.table.write().await.bodies.get_mut(&body_id) {
            hosted.status = BodyStatus::Active;
        }
    }

    /// Active bodies hosted on `node_url`
    pub async fn active_objects(&self, node_url: &RuntimeUrl) -> Vec<BodyHandle> {
        self.collect(|hosted| &hosted.node_url == node_url).await
    }

    pub async fn active_objects_of_class(
        &self,
        node_url: &RuntimeUrl,
        class_name: &str,
    ) -> Vec<BodyHandle> {
        self.collect(|hosted| &hosted.node_url == node_url && hosted.body.class_name == class_name)
            .await
    }

    pub async fn status(&self, body_id: BodyId) -> Option<BodyStatus> {
        self.table.read().await.bodies.get(&body_id).map(|hosted| hosted.status)
    }

    /// Current copy of a hosted body
    pub async fn body(&self, body_id: BodyId) -> Option<Body> {
        self.table.read().await.bodies.get(&body_id).map(|hosted| hosted.body.clone())
    }

    /// Handle of a hosted body, including one that is migrating out
    pub async fn locate(&self, body_id: BodyId) -> Option<BodyHandle> {
        self.table.read().await.bodies.get(&body_id).map(HostedBody::handle)
    }

    pub async fn last_checkpoint(&self, body_id: BodyId) -> Option<u64> {
        self.table.read().await.sequences.get(&body_id).copied()
    }

    /// Drop every body hosted on a killed node
    pub async fn evict_node(&self, node_url: &RuntimeUrl) -> Vec<BodyId> {
        let mut table = self.table.write().await;
        let evicted: Vec<BodyId> = table
            .bodies
            .values()
            .filter(|hosted| &hosted.node_url == node_url)
            .map(|hosted| hosted.body.id)
            .collect();
        for id in &evicted {
            table.bodies.remove(id);
        }
        if !evicted.is_empty() {
            debug!(node = %node_url, count = evicted.len(), "Evicted bodies of killed node");
        }
        evicted
    }

    async fn collect<F>(&self, predicate: F) -> Vec<BodyHandle>
    where
        F: Fn(&HostedBody) -> bool,
    {
        let table = self.table.read().await;
        let mut handles: Vec<_> = table
            .bodies
            .values()
            .filter(|hosted| hosted.status == BodyStatus::Active && predicate(hosted))
            .map(HostedBody::handle)
            .collect();
        handles.sort_by_key(|handle| handle.id);
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;

    fn transport() -> BodyTransport {
        let constructors = ConstructorRegistry::new();
        constructors.register("Counter", testing::counter());
        BodyTransport::new(constructors)
    }

    fn node(name: &str) -> RuntimeUrl {
        RuntimeUrl::new("pa", "localhost", 1099, name).unwrap()
    }

    #[tokio::test]
    async fn test_create_body_runs_constructor() {
        let transport = transport();
        let (handle, body) = transport
            .create_body(
                &node("worker-1"),
                &ConstructorCall::new("Counter", json!({"start": 5})),
                true,
            )
            .await
            .unwrap();

        assert_eq!(body.state, Bytes::from("5"));
        assert!(handle.is_local);
        assert_eq!(transport.active_objects(&node("worker-1")).await, vec![handle]);
    }

    #[tokio::test]
    async fn test_constructor_failure_is_reported() {
        let transport = transport();

        let err = transport
            .create_body(&node("worker-1"), &ConstructorCall::new("Counter", json!({})), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ConstructionFailed { .. }));

        let err = transport
            .create_body(&node("worker-1"), &ConstructorCall::new("Missing", json!(null)), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ConstructionFailed { ref class_name, .. } if class_name == "Missing"
        ));
        assert!(transport.active_objects(&node("worker-1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_sequence_is_monotonic() {
        let transport = transport();
        let id = BodyId::new();
        let checkpoint = |state: &'static str| Checkpoint {
            body_id: id,
            class_name: "Counter".to_string(),
            state: Bytes::from_static(state.as_bytes()),
        };

        transport.receive_checkpoint(&node("worker-1"), checkpoint("1"), 1).await.unwrap();
        transport.receive_checkpoint(&node("worker-1"), checkpoint("3"), 3).await.unwrap();

        let err = transport
            .receive_checkpoint(&node("worker-1"), checkpoint("2"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::StaleCheckpoint { received: 2, last_applied: 3, .. }));
        assert_eq!(transport.body(id).await.unwrap().state, Bytes::from("3"));
        assert_eq!(transport.last_checkpoint(id).await, Some(3));
    }

    #[tokio::test]
    async fn test_migration_hides_body_until_resolved() {
        let transport = transport();
        let (handle, _) = transport
            .create_body(
                &node("worker-1"),
                &ConstructorCall::new("Counter", json!({"start": 1})),
                true,
            )
            .await
            .unwrap();

        let (body, from) = transport.begin_migration(handle.id).await.unwrap();
        assert_eq!(body.id, handle.id);
        assert_eq!(from, node("worker-1"));
        assert_eq!(transport.status(handle.id).await, Some(BodyStatus::MigratingOut));
        assert!(transport.active_objects(&node("worker-1")).await.is_empty());
        assert!(matches!(
            transport.begin_migration(handle.id).await.unwrap_err(),
            RuntimeError::MigrationInProgress { .. }
        ));

        transport.abort_migration(handle.id).await;
        assert_eq!(transport.status(handle.id).await, Some(BodyStatus::Active));

        transport.begin_migration(handle.id).await.unwrap();
        transport.complete_migration(handle.id).await;
        assert_eq!(transport.status(handle.id).await, None);
    }

    #[tokio::test]
    async fn test_checkpoint_rejected_while_migrating_out() {
        let transport = transport();
        let call = ConstructorCall::new("Counter", json!({"start": 1}));
        let (handle, body) = transport.create_body(&node("worker-1"), &call, true).await.unwrap();
        transport.begin_migration(handle.id).await.unwrap();

        let mut checkpoint = Checkpoint::of(&body);
        checkpoint.state = Bytes::from("9");
        let err = transport
            .receive_checkpoint(&node("worker-2"), checkpoint, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MigrationInProgress { body_id } if body_id == handle.id
        ));

        assert_eq!(transport.status(handle.id).await, Some(BodyStatus::MigratingOut));
        assert_eq!(transport.locate(handle.id).await, Some(handle.clone()));
        assert_eq!(transport.body(handle.id).await.unwrap().state, Bytes::from("1"));
        assert_eq!(transport.last_checkpoint(handle.id).await, None);
        assert!(transport.active_objects(&node("worker-2")).await.is_empty());
    }

    #[tokio::test]
    async fn test_evict_node_only_touches_that_node() {
        let transport = transport();
        let call = ConstructorCall::new("Counter", json!({"start": 0}));
        transport.create_body(&node("worker-1"), &call, true).await.unwrap();
        let (kept, _) = transport.create_body(&node("worker-2"), &call, true).await.unwrap();

        assert_eq!(transport.evict_node(&node("worker-1")).await.len(), 1);
        assert_eq!(transport.active_objects(&node("worker-2")).await, vec![kept]);
    }
}
