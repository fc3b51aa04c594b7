//! Presentation subsystem: protocol demultiplexing of accepted connections.
//!
//! # Data Flow
//! ```text
//! accepted Socket
//!     → chain.rs (shared lock, wrappers tried in insertion order)
//!         → sniff.rs (peek 5 bytes, classify TLS / SSLv2-3, terminate TLS)
//!         → ... other wrappers ...
//!     → wrapper.rs NullWrapper (catch-all, plain, secure = false)
//!     → Presented { stream, secure }
//! ```
//!
//! # Design Decisions
//! - Detection never consumes bytes; a declining wrapper hands the socket back untouched
//! - Detection timeouts and peek errors mean "decline", never a connection error
//! - Runs exactly once per accepted connection, before any header is read

pub mod chain;
pub mod sniff;
pub mod wrapper;

pub use chain::PresentationChain;
pub use sniff::{classify, Classification, RustlsTerminator, SecureDecorator, TlsSniffWrapper};
pub use wrapper::{NullWrapper, Presented, PresentationWrapper, WrapOutcome};
