//! # Runtime Configuration
//!
//! Configuration management and defaults for remote runtimes.
//!
//! ## Features
//!
//! - **Runtime identity**: host, port, transport tag and process name used to
//!   build the canonical runtime URL
//! - **Naming policy**: strict or forgiving handling of binding conflicts
//! - **Startup topology**: nodes and virtual nodes created at boot
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::load(Some("config/runtime.toml".as_ref()), None)?;
//! println!("runtime {} on port {}", config.runtime.name, config.runtime.port);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod runtime_config;

// Re-export commonly used types
pub use runtime_config::{
    EventSettings, NamingSettings, NodeSettings, RuntimeConfig, RuntimeSettings,
    SecuritySettings, load_config,
};
