//! Body creation, migration and checkpoint recovery between two runtimes

mod common;

use bytes::Bytes;
use remote_runtime::{
    Checkpoint, ConstructorCall, InMemoryNaming, NamingFacility, NodeSpec, RemoteRuntime,
    RuntimeError,
};
use serde_json::json;

async fn two_runtimes(
    naming: &InMemoryNaming,
) -> (
    std::sync::Arc<remote_runtime::ActiveRuntime>,
    std::sync::Arc<remote_runtime::ActiveRuntime>,
) {
    let r1 = common::runtime("R1", naming).await;
    let mut config = common::config("R2");
    config.runtime.port = 2099;
    let r2 = common::start(config, naming).await.unwrap();

    r1.create_local_node(NodeSpec::new("worker-1")).await.unwrap();
    r2.create_local_node(NodeSpec::new("worker-2")).await.unwrap();
    (r1, r2)
}

#[tokio::test]
async fn construction_errors_are_typed() {
    let naming = InMemoryNaming::new();
    let (r1, _r2) = two_runtimes(&naming).await;

    let err = r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": -1})), true)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ConstructionFailed { .. }));
    assert!(std::error::Error::source(&err).unwrap().to_string().contains("negative"));

    let err = r1
        .create_body("worker-2", ConstructorCall::new("Counter", json!({"start": 1})), true)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownNode { .. }));
}

#[tokio::test]
async fn migration_keeps_id_and_single_home() {
    let naming = InMemoryNaming::new();
    let (r1, r2) = two_runtimes(&naming).await;

    let handle = r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": 17})), true)
        .await
        .unwrap();

    // the target is looked up through naming, as a peer would
    let target = naming.resolve(r2.url()).await.unwrap();
    let moved = r1.migrate_body(handle.id, target, "worker-2").await.unwrap();

    assert_eq!(moved.id, handle.id);
    assert_eq!(moved.node_url.name(), "worker-2");
    assert!(r1.active_objects("worker-1").await.unwrap().is_empty());
    assert_eq!(r2.active_objects("worker-2").await.unwrap(), vec![moved]);
    assert!(matches!(
        r1.body_state(handle.id).await.unwrap_err(),
        RuntimeError::UnknownBody { .. }
    ));
    assert_eq!(r2.body_state(handle.id).await.unwrap().state, Bytes::from("17"));

    // already gone from R1
    let err = r1.migrate_body(handle.id, r2.clone(), "worker-2").await.unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownBody { .. }));
}

#[tokio::test]
async fn stale_checkpoint_leaves_state_alone() {
    let naming = InMemoryNaming::new();
    let (r1, r2) = two_runtimes(&naming).await;

    let handle = r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": 1})), true)
        .await
        .unwrap();
    let mut checkpoint = Checkpoint::of(&r1.body_state(handle.id).await.unwrap());
    checkpoint.state = Bytes::from_static(b"42");

    let restored = r2
        .receive_checkpoint("worker-2", checkpoint.clone(), 7)
        .await
        .unwrap();
    assert_eq!(restored.id, handle.id);

    let mut older = checkpoint.clone();
    older.state = Bytes::from_static(b"0");
    let err = r2.receive_checkpoint("worker-2", older, 7).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::StaleCheckpoint {
            received: 7,
            last_applied: 7,
            ..
        }
    ));
    assert_eq!(r2.body_state(handle.id).await.unwrap().state, Bytes::from("42"));

    checkpoint.state = Bytes::from_static(b"43");
    r2.receive_checkpoint("worker-2", checkpoint, 8).await.unwrap();
    assert_eq!(r2.body_state(handle.id).await.unwrap().state, Bytes::from("43"));
}

#[tokio::test]
async fn checkpoint_for_unknown_node_is_rejected() {
    let naming = InMemoryNaming::new();
    let (r1, _r2) = two_runtimes(&naming).await;
    let handle = r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": 1})), true)
        .await
        .unwrap();
    let checkpoint = Checkpoint::of(&r1.body_state(handle.id).await.unwrap());

    let err = r1.receive_checkpoint("ghost", checkpoint, 1).await.unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownNode { .. }));
}

#[tokio::test]
async fn killing_a_node_drops_its_bodies() {
    let naming = InMemoryNaming::new();
    let (r1, _r2) = two_runtimes(&naming).await;
    let handle = r1
        .create_body("worker-1", ConstructorCall::new("Counter", json!({"start": 1})), false)
        .await
        .unwrap();

    r1.kill_node("worker-1").await.unwrap();
    assert!(r1.body_state(handle.id).await.is_err());

    r1.create_local_node(NodeSpec::new("worker-1")).await.unwrap();
    assert!(r1.active_objects("worker-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn class_filter_only_returns_matching_bodies() {
    let naming = InMemoryNaming::new();
    let (r1, _r2) = two_runtimes(&naming).await;
    let logger_constructor =
        |_: &serde_json::Value| -> Result<Bytes, remote_runtime::BoxError> { Ok(Bytes::new()) };
    r1.constructors()
        .register("Logger", std::sync::Arc::new(logger_constructor));

    r1.create_body("worker-1", ConstructorCall::new("Counter", json!({"start": 1})), true)
        .await
        .unwrap();
    let logger = r1
        .create_body("worker-1", ConstructorCall::new("Logger", json!(null)), true)
        .await
        .unwrap();

    assert_eq!(r1.active_objects("worker-1").await.unwrap().len(), 2);
    assert_eq!(
        r1.active_objects_of_class("worker-1", "Logger").await.unwrap(),
        vec![logger]
    );
}
