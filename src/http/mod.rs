//! HTTP plumbing: the wire-level collaborators the message transport runs on.
//!
//! # Data Flow
//! ```text
//! Presented stream
//!     → connection.rs (HttpConnection: Connection collaborator)
//!         → codec.rs (start line + `Name: value` fields)
//!         → chunked.rs (chunk framing, trailer block)
//!     → message transport (content negotiation, compression)
//!
//! server.rs: tokio accept loop → blocking worker per connection
//! ```
//!
//! # Design Decisions
//! - Header fields live in `http::HeaderMap` (case-insensitive, multi-valued)
//! - Body streams borrow the connection; only one body is in flight at a time
//! - Trailers are shared handles so the sender can fill them while streaming

pub mod chunked;
pub mod codec;
pub mod connection;
pub mod header;
pub mod server;
pub mod trailer;

pub use connection::{BodyWriter, Connection, HttpConnection};
pub use header::{Header, StartLine};
pub use server::HttpServer;
pub use trailer::Trailer;
