//! Runtime defaults
//!
//! Default values used when a configuration file leaves a field out.

/// Runtime identity defaults
pub mod runtime {
    /// Host the runtime advertises in its URL
    pub const HOST: &str = "localhost";

    /// Naming facility port
    pub const PORT: u16 = 1099;

    /// Scheme segment of canonical URLs
    pub const TRANSPORT_TAG: &str = "pa";

    /// Prefix of generated process names
    pub const NAME_PREFIX: &str = "PA_JVM";
}

/// Naming facility defaults
pub mod naming {
    /// Conflicts on non-replace bindings are logged, not returned
    pub const STRICT_REGISTRATION: bool = false;
}

/// Event stream defaults
pub mod events {
    /// Broadcast channel capacity; slow observers lag past this
    pub const CHANNEL_CAPACITY: usize = 1024;
}

/// Environment variable prefix for overrides (`RUNTIME_RUNTIME__PORT=2000`)
pub const ENV_PREFIX: &str = "RUNTIME";
