//! Runtime Registry
//!
//! Owns this process's public identity and performs every bind/unbind against
//! the naming facility. Conflicts under non-replace mode are tolerated unless
//! strict registration is configured: a stale binding left by a crashed peer
//! is common.

use crate::naming::{NamingFacility, RuntimeHandle};
use crate::url::{HostResolver, RuntimeUrl};
use crate::{Result, RuntimeError};
use runtime_config::RuntimeSettings;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable identity of this runtime process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub host: String,
    pub process_name: String,
    pub transport_tag: String,
    pub port: u16,
}

impl RuntimeIdentity {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            host: settings.host.clone(),
            process_name: settings.name.clone(),
            transport_tag: settings.transport_tag.clone(),
            port: settings.port,
        }
    }

    /// Canonical URL of the runtime itself
    pub fn url(&self) -> Result<RuntimeUrl> {
        RuntimeUrl::new(&self.transport_tag, &self.host, self.port, &self.process_name)
    }
}

/// Result of a register call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Fresh binding
    Bound,
    /// Previous binding replaced
    Rebound,
    /// Name was already bound and left as is
    AlreadyBound,
}

/// Result of an unregister call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Unbound,
    WasAbsent,
}

/// Binds and unbinds this runtime's names
pub struct RuntimeRegistry {
    identity: RuntimeIdentity,
    url: RuntimeUrl,
    naming: Arc<dyn NamingFacility>,
    resolver: Arc<dyn HostResolver>,
    strict: bool,
}

impl RuntimeRegistry {
    pub fn new(
        identity: RuntimeIdentity,
        naming: Arc<dyn NamingFacility>,
        resolver: Arc<dyn HostResolver>,
        strict: bool,
    ) -> Result<Self> {
        let url = identity.url()?;
        Ok(Self {
            identity,
            url,
            naming,
            resolver,
            strict,
        })
    }

    /// Canonical URL of this runtime
    pub fn url(&self) -> &RuntimeUrl {
        &self.url
    }

    pub fn identity(&self) -> &RuntimeIdentity {
        &self.identity
    }

    pub fn naming(&self) -> &Arc<dyn NamingFacility> {
        &self.naming
    }

    /// Bind `url` to `handle`, or rebind when `replace_if_bound`
    pub async fn register(
        &self,
        url: &RuntimeUrl,
        handle: RuntimeHandle,
        replace_if_bound: bool,
    ) -> Result<RegisterOutcome> {
        let outcome = if replace_if_bound {
            self.naming.rebind(url, handle).await.map(|_| RegisterOutcome::Rebound)
        } else {
            self.naming.bind(url, handle).await.map(|_| RegisterOutcome::Bound)
        };

        match outcome {
            Ok(outcome) => {
                if self.is_internal(url) {
                    debug!(%url, "Bound in registry");
                } else {
                    info!(%url, ?outcome, "{} successfully bound in registry", url);
                }
                Ok(outcome)
            }
            Err(e) if e.is_name_conflict() && !self.strict => {
                warn!(%url, "{} already bound in registry", url);
                Ok(RegisterOutcome::AlreadyBound)
            }
            Err(e) if e.is_name_conflict() => Err(e),
            Err(e) => Err(wrap_transport(e, "cannot bind in registry", url)),
        }
    }

    /// Remove the binding for `url`; an absent binding is success
    pub async fn unregister(&self, url: &RuntimeUrl) -> Result<UnregisterOutcome> {
        match self.naming.unbind(url).await {
            Ok(()) => {
                if self.is_internal(url) {
                    debug!(%url, "Unbound from registry");
                } else {
                    info!(%url, "{} unbound in registry", url);
                }
                Ok(UnregisterOutcome::Unbound)
            }
            Err(e) if e.is_not_bound() => {
                info!(%url, "{} is not bound in the registry", url);
                Ok(UnregisterOutcome::WasAbsent)
            }
            Err(e) => Err(wrap_transport(e, "cannot unbind in registry", url)),
        }
    }

    /// Build the canonical URL for a node or virtual node name.
    ///
    /// A bare name is placed under this runtime's host and port; a name
    /// containing `/` is taken as a full URL.
    pub fn node_url(&self, name: &str) -> Result<RuntimeUrl> {
        if name.contains('/') {
            RuntimeUrl::parse(name)
        } else {
            self.url.with_name(name)
        }
    }

    /// Check the host of `url` resolves before it gets published
    pub async fn resolve_host(&self, url: &RuntimeUrl) -> Result<IpAddr> {
        self.resolver
            .resolve(url.host())
            .await
            .map_err(|e| match e {
                RuntimeError::HostResolution { message, .. } => {
                    RuntimeError::host_resolution(url, message)
                }
                other => other,
            })
    }

    /// Bindings under the process name stay out of info-level logs
    fn is_internal(&self, url: &RuntimeUrl) -> bool {
        url.name().starts_with(runtime_config::defaults::runtime::NAME_PREFIX)
    }
}

fn wrap_transport(err: RuntimeError, what: &str, url: &RuntimeUrl) -> RuntimeError {
    match err {
        RuntimeError::TransportFailure { .. } => err,
        other => RuntimeError::transport_with_source(format!("{} at {}", what, url), other),
    }
}
