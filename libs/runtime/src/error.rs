//! Runtime Error Types
//!
//! Typed failures of the remote runtime protocol. Every error that crosses a
//! process boundary is one of these variants; local bookkeeping mismatches are
//! handled as no-ops and never reach this type.

use crate::body::BodyId;
use thiserror::Error;

/// Boxed error used for wrapped causes
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main runtime protocol error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Binding collision under non-replace mode
    #[error("Name conflict: {url} is already bound")]
    NameConflict { url: String },

    /// Unbind or resolve target is absent
    #[error("Not bound: {url}")]
    NotBound { url: String },

    /// Local or remote host cannot be resolved
    #[error("Host unknown in {url}: {message}")]
    HostResolution { url: String, message: String },

    /// Instantiating an active object failed
    #[error("Construction of '{class_name}' failed: {source}")]
    ConstructionFailed { class_name: String, source: BoxError },

    /// Operation referenced a node not present on this runtime
    #[error("Unknown node: {node}")]
    UnknownNode { node: String },

    /// Operation referenced a body not hosted on this runtime
    #[error("Unknown body: {body_id}")]
    UnknownBody { body_id: BodyId },

    /// Body is already being shipped to another runtime
    #[error("Body {body_id} is already migrating")]
    MigrationInProgress { body_id: BodyId },

    /// Checkpoint sequence not newer than the last applied one
    #[error("Stale checkpoint for {body_id}: sequence {received} <= last applied {last_applied}")]
    StaleCheckpoint {
        body_id: BodyId,
        received: u64,
        last_applied: u64,
    },

    /// No policy evaluator configured for this runtime
    #[error("Security not available: {message}")]
    SecurityUnavailable { message: String },

    /// The policy evaluator refused the context
    #[error("Security policy rejected request: {message}")]
    SecurityRejected { message: String },

    /// Malformed canonical URL or name
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Runtime configuration rejected at startup
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Runtime no longer accepts calls
    #[error("Runtime {url} is shut down")]
    ShutDown { url: String },

    /// Underlying RPC or naming transport failure
    #[error("Transport failure: {message}")]
    TransportFailure {
        message: String,
        source: Option<BoxError>,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a name conflict error
    pub fn name_conflict(url: impl ToString) -> Self {
        Self::NameConflict {
            url: url.to_string(),
        }
    }

    /// Create a not-bound error
    pub fn not_bound(url: impl ToString) -> Self {
        Self::NotBound {
            url: url.to_string(),
        }
    }

    /// Create a host resolution error
    pub fn host_resolution(url: impl ToString, message: impl Into<String>) -> Self {
        Self::HostResolution {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// Wrap a constructor failure
    pub fn construction_failed(class_name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConstructionFailed {
            class_name: class_name.into(),
            source: source.into(),
        }
    }

    pub fn unknown_node(node: impl ToString) -> Self {
        Self::UnknownNode {
            node: node.to_string(),
        }
    }

    pub fn security_unavailable(message: impl Into<String>) -> Self {
        Self::SecurityUnavailable {
            message: message.into(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn shut_down(url: impl ToString) -> Self {
        Self::ShutDown {
            url: url.to_string(),
        }
    }

    /// Create a transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport failure with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransportFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a caller may treat this error as "already done"
    pub fn is_not_bound(&self) -> bool {
        matches!(self, Self::NotBound { .. })
    }

    pub fn is_name_conflict(&self) -> bool {
        matches!(self, Self::NameConflict { .. })
    }

    /// Errors a caller may recover from by degrading or retrying elsewhere
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NameConflict { .. }
                | Self::NotBound { .. }
                | Self::SecurityUnavailable { .. }
                | Self::StaleCheckpoint { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_failed_keeps_source() {
        let err = RuntimeError::construction_failed("Counter", "bad args");
        assert!(err.to_string().contains("Counter"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(RuntimeError::name_conflict("pa://h:1/x").is_recoverable());
        assert!(RuntimeError::security_unavailable("none").is_recoverable());
        assert!(!RuntimeError::transport("boom").is_recoverable());
        assert!(!RuntimeError::unknown_node("n").is_recoverable());
    }
}
