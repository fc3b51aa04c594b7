//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! add_service(service, security, initialize, domain)
//!     → service.rs (initialize hook, outside the lock)
//!     → container.rs (exclusive lock: insert per target domain, roll back on duplicate)
//!     → dispatch routing table (mirrors committed registrations)
//!
//! request → routing table lookup (shared lock) → WebService::service
//! ```
//!
//! # Design Decisions
//! - Services are shared `Arc<dyn WebService>`; identity is pointer identity
//! - A failed multi-domain registration leaves no trace
//! - Cleanup runs once per distinct instance per removal call

pub mod container;
pub mod security;
pub mod service;

pub use container::ServiceRegistry;
pub use security::SecurityType;
pub use service::{same_service, FnService, ServiceRef, WebService};
