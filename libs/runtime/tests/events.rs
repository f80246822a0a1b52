//! Event stream seen by an observer across a full runtime lifecycle

mod common;

use remote_runtime::{
    Checkpoint, ConstructorCall, InMemoryNaming, NodeSpec, PeerRuntime, RemoteRuntime,
    RuntimeEvent,
};
use serde_json::json;

#[tokio::test]
async fn lifecycle_events_carry_identity_fields() {
    common::init_tracing();
    let naming = InMemoryNaming::new();
    let r1 = common::runtime("R1", &naming).await;
    let r2 = common::runtime("R2", &naming).await;
    let runtime_url = r1.url().clone();
    let mut events = r1.events().subscribe();

    let group_url = r1.register_virtual_node("vg-A", false).await.unwrap();
    let node_url = r1
        .create_local_node(
            NodeSpec::new("worker-1")
                .with_job_id("J1")
                .with_virtual_node("vg-A"),
        )
        .await
        .unwrap();
    r1.register_runtime(PeerRuntime::new("R2", r2.clone(), "creator", "local", "vm-b"))
        .await
        .unwrap();

    let handle = r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": 1})), true)
        .await
        .unwrap();
    let mut checkpoint = Checkpoint::of(&r1.body_state(handle.id).await.unwrap());
    checkpoint.state = "2".into();
    r1.receive_checkpoint("worker-1", checkpoint, 1).await.unwrap();

    r1.kill_node("worker-1").await.unwrap();
    r1.unregister_virtual_node("vg-A").await.unwrap();
    r1.unregister_runtime("R2").await.unwrap();
    r1.kill_runtime().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert_eq!(
        seen,
        vec![
            RuntimeEvent::VirtualNodeRegistered {
                runtime_url: runtime_url.clone(),
                name: "vg-A".to_string(),
                url: group_url,
            },
            RuntimeEvent::NodeCreated {
                runtime_url: runtime_url.clone(),
                node_url: node_url.clone(),
                job_id: "J1".to_string(),
                virtual_node: Some("vg-A".to_string()),
            },
            RuntimeEvent::PeerRegistered {
                runtime_url: runtime_url.clone(),
                peer_name: "R2".to_string(),
            },
            RuntimeEvent::BodyCreated {
                body_id: handle.id,
                node_url: node_url.clone(),
                class_name: "Counter".to_string(),
            },
            RuntimeEvent::CheckpointApplied {
                body_id: handle.id,
                node_url: node_url.clone(),
                sequence: 1,
            },
            RuntimeEvent::NodeKilled {
                runtime_url: runtime_url.clone(),
                node_url,
            },
            RuntimeEvent::VirtualNodeUnregistered {
                runtime_url: runtime_url.clone(),
                name: "vg-A".to_string(),
            },
            RuntimeEvent::PeerUnregistered {
                runtime_url: runtime_url.clone(),
                peer_name: "R2".to_string(),
            },
            RuntimeEvent::RuntimeStopped { runtime_url },
        ]
    );
}

#[tokio::test]
async fn rejected_operations_emit_nothing() {
    let naming = InMemoryNaming::new();
    let r1 = common::runtime("R1", &naming).await;
    r1.create_local_node(NodeSpec::new("worker-1")).await.unwrap();
    let mut events = r1.events().subscribe();

    assert!(r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": -1})), true)
        .await
        .is_err());
    assert!(r1
        .create_body("worker-9", ConstructorCall::new("Counter", json!({"start": 1})), true)
        .await
        .is_err());
    r1.kill_node("worker-9").await.unwrap();
    r1.unregister_virtual_node("vg-unknown").await.unwrap();
    r1.unregister_runtime("nobody").await.unwrap();

    assert!(events.try_recv().is_err());
}
