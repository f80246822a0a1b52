//! Shared setup for runtime integration tests

#![allow(dead_code)]

use bytes::Bytes;
use remote_runtime::{
    ActiveRuntime, BodyConstructor, BoxError, InMemoryNaming, RuntimeError, StaticResolver,
};
use runtime_config::RuntimeConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with_host("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_host("node-b", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
}

/// State is the decimal `start` argument; a negative start fails
pub fn counter() -> Arc<dyn BodyConstructor> {
    Arc::new(|args: &serde_json::Value| -> Result<Bytes, BoxError> {
        let start = args
            .get("start")
            .and_then(|v| v.as_i64())
            .ok_or("missing start")?;
        if start < 0 {
            return Err(format!("negative start {}", start).into());
        }
        Ok(Bytes::from(start.to_string()))
    })
}

pub fn config(name: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.runtime.name = name.to_string();
    config
}

pub async fn start(
    config: RuntimeConfig,
    naming: &InMemoryNaming,
) -> Result<Arc<ActiveRuntime>, RuntimeError> {
    ActiveRuntime::builder(config, Arc::new(naming.clone()))
        .resolver(Arc::new(resolver()))
        .constructor("Counter", counter())
        .start()
        .await
}

pub async fn runtime(name: &str, naming: &InMemoryNaming) -> Arc<ActiveRuntime> {
    start(config(name), naming).await.expect("runtime starts")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("remote_runtime=debug")
        .with_test_writer()
        .try_init();
}
