//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! HttpConnection
//!     → servicer.rs (receive header, version check, keep-alive decision)
//!     → routes.rs (Host → domain or "*", normalized path, parent fallback,
//!                  secure or non-secure table)
//!     → exchange.rs (request/response pair handed to the WebService)
//!     → servicer.rs (204 for silent services, json error for failures)
//! ```
//!
//! # Design Decisions
//! - The routing table is written only by the service registry
//! - Lookups take a shared lock; a registration never blocks on a running service

pub mod exchange;
pub mod routes;
pub mod servicer;

pub use exchange::Exchange;
pub use routes::{normalize_path, Route, RoutingTable, ANY_DOMAIN};
pub use servicer::ConnectionServicer;
