//! Message transport subsystem.
//!
//! # Data Flow
//! ```text
//! Message (envelope.rs: one content mode + custom headers + trailer)
//!     → transport.rs (send / receive over a Connection)
//!         → content_type.rs (json | xml | form, deflate | gzip)
//!         → compress.rs (compressor on send, inflater on receive)
//!         → codec/ (structured value ↔ bytes)
//! ```
//!
//! # Design Decisions
//! - Compression only applies to chunked bodies on send; inflation applies
//!   whenever Content-Encoding says so on receive
//! - Error responses (status >= 400) are decoded as values and surfaced as
//!   `Error::Remote`, never written to a sink
//! - The message tracks its own `MessageState` for callers and logs

pub mod codec;
pub mod compress;
pub mod content_type;
pub mod envelope;
pub mod state;
pub mod transport;

pub use content_type::{ContentEncoding, ContentKind};
pub use envelope::{Content, CustomHeader, Message};
pub use state::MessageState;
pub use transport::OutgoingBody;
