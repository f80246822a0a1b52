//! Security Context Relay
//!
//! Forwards policy and certificate queries to a locally held evaluator.
//! Nothing here decides policy. A runtime without an evaluator answers
//! `SecurityUnavailable` and callers fall back to unsecured execution.

use crate::error::BoxError;
use crate::url::RuntimeUrl;
use crate::{Result, RuntimeError};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// X.509 certificate in DER form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub subject: String,
    pub issuer: String,
    pub der: Bytes,
}

/// Reference to the policy server a node or runtime answers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyServerRef {
    pub name: String,
}

impl PolicyServerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Security entity taking part in an interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Runtime { url: RuntimeUrl },
    VirtualNode { name: String },
    Node { url: RuntimeUrl, job_id: String },
}

/// Attributes agreed for an interaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub communication_allowed: bool,
    pub migration_allowed: bool,
    pub authentication: bool,
    pub integrity: bool,
    pub confidentiality: bool,
}

/// Query sent to the policy evaluator and answered in place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub from: Vec<Entity>,
    pub to: Vec<Entity>,
    pub policy: Option<ResolvedPolicy>,
}

impl SecurityContext {
    pub fn new(from: Vec<Entity>, to: Vec<Entity>) -> Self {
        Self {
            from,
            to,
            policy: None,
        }
    }
}

/// Locally held security manager
pub trait PolicyEvaluator: Send + Sync {
    /// Fill in `context.policy` or reject the interaction
    fn resolve(&self, context: SecurityContext) -> std::result::Result<SecurityContext, BoxError>;

    fn certificate(&self) -> Option<Certificate> {
        None
    }

    fn policy_server(&self) -> Option<PolicyServerRef> {
        None
    }
}

#[derive(Default)]
pub struct SecurityRelay {
    evaluator: RwLock<Option<Arc<dyn PolicyEvaluator>>>,
    creator_certificate: Option<Certificate>,
    policy_server: Option<PolicyServerRef>,
}

impl SecurityRelay {
    pub fn new(
        evaluator: Option<Arc<dyn PolicyEvaluator>>,
        creator_certificate: Option<Certificate>,
        policy_server: Option<PolicyServerRef>,
    ) -> Self {
        Self {
            evaluator: RwLock::new(evaluator),
            creator_certificate,
            policy_server,
        }
    }

    /// Install or replace the security manager
    pub fn set_security_manager(&self, evaluator: Arc<dyn PolicyEvaluator>) {
        debug!("Security manager installed");
        *self.evaluator.write() = Some(evaluator);
    }

    pub fn is_available(&self) -> bool {
        self.evaluator.read().is_some()
    }

    pub fn get_policy(&self, context: SecurityContext) -> Result<SecurityContext> {
        let evaluator = self
            .evaluator
            .read()
            .clone()
            .ok_or_else(|| RuntimeError::security_unavailable("no security manager configured"))?;

        evaluator
            .resolve(context)
            .map_err(|e| RuntimeError::SecurityRejected {
                message: e.to_string(),
            })
    }

    /// Certificate of the creator of this runtime, if any
    pub fn certificate(&self) -> Option<Certificate> {
        self.creator_certificate.clone().or_else(|| {
            self.evaluator
                .read()
                .as_ref()
                .and_then(|evaluator| evaluator.certificate())
        })
    }

    pub fn policy_server(&self) -> Option<PolicyServerRef> {
        self.policy_server.clone().or_else(|| {
            self.evaluator
                .read()
                .as_ref()
                .and_then(|evaluator| evaluator.policy_server())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowAll;

    impl PolicyEvaluator for AllowAll {
        fn resolve(
            &self,
            mut context: SecurityContext,
        ) -> std::result::Result<SecurityContext, BoxError> {
            context.policy = Some(ResolvedPolicy {
                communication_allowed: true,
                migration_allowed: true,
                ..ResolvedPolicy::default()
            });
            Ok(context)
        }

        fn policy_server(&self) -> Option<PolicyServerRef> {
            Some(PolicyServerRef::new("ps-default"))
        }
    }

    struct DenyAll;

    impl PolicyEvaluator for DenyAll {
        fn resolve(
            &self,
            _context: SecurityContext,
        ) -> std::result::Result<SecurityContext, BoxError> {
            Err("migration denied".into())
        }
    }

    #[test]
    fn test_unavailable_without_evaluator() {
        let relay = SecurityRelay::default();
        let err = relay.get_policy(SecurityContext::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::SecurityUnavailable { .. }));
        assert!(relay.certificate().is_none());
    }

    #[test]
    fn test_forwards_to_evaluator() {
        let relay = SecurityRelay::default();
        relay.set_security_manager(Arc::new(AllowAll));

        let resolved = relay.get_policy(SecurityContext::default()).unwrap();
        assert!(resolved.policy.unwrap().migration_allowed);
        assert_eq!(relay.policy_server().unwrap().name, "ps-default");
    }

    #[test]
    fn test_rejection_is_not_unavailability() {
        let relay = SecurityRelay::new(Some(Arc::new(DenyAll)), None, None);
        let err = relay.get_policy(SecurityContext::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::SecurityRejected { .. }));
    }

    #[test]
    fn test_creator_certificate_wins() {
        let cert = Certificate {
            subject: "CN=runtime".to_string(),
            issuer: "CN=ca".to_string(),
            der: Bytes::from_static(b"\x30\x00"),
        };
        let relay = SecurityRelay::new(None, Some(cert.clone()), None);
        assert_eq!(relay.certificate(), Some(cert));
    }
}
