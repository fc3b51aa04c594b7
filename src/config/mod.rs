//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent on a channel; the binary applies default domains to the
//!       registry and swaps the server's TransportConfig
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Listener and TLS settings are read once at startup; reloads only touch
//!   transport timeouts and registry default domains

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    DetectionConfig, ListenerConfig, LogFormat, ObservabilityConfig, RegistryConfig,
    RuntimeConfig, TlsConfig, TransportConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
