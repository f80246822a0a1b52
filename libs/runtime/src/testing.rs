//! Shared fixtures for unit tests

use crate::body::BodyConstructor;
use crate::error::BoxError;
use crate::naming::InMemoryNaming;
use crate::runtime::ActiveRuntime;
use crate::url::StaticResolver;
use bytes::Bytes;
use runtime_config::RuntimeConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub(crate) fn resolver() -> StaticResolver {
    StaticResolver::new().with_host("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Counter state is the decimal `start` argument
pub(crate) fn counter() -> Arc<dyn BodyConstructor> {
    Arc::new(|args: &serde_json::Value| -> Result<Bytes, BoxError> {
        let start = args
            .get("start")
            .and_then(|v| v.as_u64())
            .ok_or("missing start")?;
        Ok(Bytes::from(start.to_string()))
    })
}

/// Start a runtime named `name` on localhost:1099
pub(crate) async fn runtime(name: &str, naming: &InMemoryNaming) -> Arc<ActiveRuntime> {
    let mut config = RuntimeConfig::default();
    config.runtime.name = name.to_string();

    ActiveRuntime::builder(config, Arc::new(naming.clone()))
        .resolver(Arc::new(resolver()))
        .constructor("Counter", counter())
        .start()
        .await
        .expect("test runtime starts")
}
