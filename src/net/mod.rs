//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → socket.rs (blocking `Socket` handed to a worker)
//!     → presentation chain (TLS sniffing, optional termination)
//!     → connection.rs (lifecycle tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - The `Socket` trait is the only view of a raw connection the rest of the crate gets

pub mod connection;
pub mod listener;
pub mod socket;
pub mod tls;

pub use socket::{Socket, Stream};
