//! Runtime Events
//!
//! Observers (monitors, REST caches, schedulers) follow the runtime through
//! this stream only. Events carry identity fields, never live handles.

use crate::body::BodyId;
use crate::url::RuntimeUrl;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Direction of a migration as seen by the emitting runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// This runtime bound its own URL
    RuntimeStarted { runtime_url: RuntimeUrl },

    /// This runtime finished its teardown cascade
    RuntimeStopped { runtime_url: RuntimeUrl },

    /// A peer runtime registered itself here
    PeerRegistered {
        runtime_url: RuntimeUrl,
        peer_name: String,
    },

    PeerUnregistered {
        runtime_url: RuntimeUrl,
        peer_name: String,
    },

    NodeCreated {
        runtime_url: RuntimeUrl,
        node_url: RuntimeUrl,
        job_id: String,
        virtual_node: Option<String>,
    },

    NodeKilled {
        runtime_url: RuntimeUrl,
        node_url: RuntimeUrl,
    },

    VirtualNodeRegistered {
        runtime_url: RuntimeUrl,
        name: String,
        url: RuntimeUrl,
    },

    VirtualNodeUnregistered {
        runtime_url: RuntimeUrl,
        name: String,
    },

    BodyCreated {
        body_id: BodyId,
        node_url: RuntimeUrl,
        class_name: String,
    },

    BodyMigrated {
        body_id: BodyId,
        node_url: RuntimeUrl,
        direction: MigrationDirection,
    },

    CheckpointApplied {
        body_id: BodyId,
        node_url: RuntimeUrl,
        sequence: u64,
    },
}

/// Broadcast fan-out of runtime events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers; no subscribers is fine
    pub fn publish(&self, event: RuntimeEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(?event, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
