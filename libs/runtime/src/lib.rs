//! Remote Runtime Protocol
//!
//! Process-level runtime for a distributed active-object platform. Each
//! runtime publishes itself, its nodes and its virtual nodes in a naming
//! facility, hosts active-object bodies on those nodes, and accepts bodies
//! and checkpoints migrating in from peers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌─────────────────────┐
//! │        ActiveRuntime         │        │  NamingFacility     │
//! │                              │ bind   │                     │
//! │  RuntimeRegistry ────────────┼───────▶│  url ─▶ Arc<dyn     │
//! │  NodeManager                 │ unbind │        RemoteRuntime│
//! │  VirtualNodeRegistrar        │        └─────────────────────┘
//! │  BodyTransport               │
//! │  AcquaintanceDirectory       │ receive_body / checkpoint
//! │  SecurityRelay               │◀────────────── peer runtimes
//! │  EventBus ───────────────────┼──▶ observers
//! └──────────────────────────────┘
//! ```
//!
//! Peers only ever see `dyn RemoteRuntime`; an RPC stub implements the same
//! trait as the in-process runtime.
//!
//! # Examples
//!
//! ```rust,no_run
//! use remote_runtime::{ActiveRuntime, InMemoryNaming, NodeSpec, RemoteRuntime};
//! use runtime_config::RuntimeConfig;
//! use std::sync::Arc;
//!
//! # async fn demo() -> remote_runtime::Result<()> {
//! let naming = InMemoryNaming::new();
//! let runtime = ActiveRuntime::start(RuntimeConfig::default(), Arc::new(naming)).await?;
//!
//! let node = runtime
//!     .create_local_node(NodeSpec::new("worker-1").with_job_id("J1"))
//!     .await?;
//! println!("node bound at {node}");
//!
//! runtime.kill_runtime().await?;
//! # Ok(())
//! # }
//! ```

pub mod acquaintances;
pub mod body;
pub mod error;
pub mod events;
pub mod naming;
pub mod nodes;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod security;
pub mod sweep;
pub mod url;
pub mod virtual_nodes;

#[cfg(test)]
mod testing;

pub use acquaintances::{AcquaintanceDirectory, PeerRuntime};
pub use body::{
    Body, BodyConstructor, BodyHandle, BodyId, BodyStatus, Checkpoint, ConstructorCall,
    ConstructorRegistry,
};
pub use error::{BoxError, Result, RuntimeError};
pub use events::{EventBus, MigrationDirection, RuntimeEvent};
pub use naming::{InMemoryNaming, NamingFacility, RuntimeHandle};
pub use nodes::{NodeHandle, NodeSpec};
pub use protocol::RemoteRuntime;
pub use registry::{RegisterOutcome, RuntimeIdentity, UnregisterOutcome};
pub use runtime::{ActiveRuntime, LifecycleState, RuntimeBuilder, RuntimeInfo, ShutdownReport};
pub use security::{
    Certificate, Entity, PolicyEvaluator, PolicyServerRef, ResolvedPolicy, SecurityContext,
};
pub use sweep::{SweepFailure, SweepReport};
pub use url::{HostResolver, RuntimeUrl, StaticResolver, SystemResolver};
pub use virtual_nodes::VirtualNodeGroup;
