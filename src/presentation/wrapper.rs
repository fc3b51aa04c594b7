//! Presentation wrapper contract.

use std::net::SocketAddr;

use crate::net::{Socket, Stream};

/// A connection ready for header processing.
pub struct Presented {
    /// Decorated stream (TLS session or the raw socket).
    pub stream: Box<dyn Stream>,
    /// True if a security layer was negotiated.
    pub secure: bool,
    /// Name of the wrapper that accepted the connection.
    pub wrapper: &'static str,
    pub peer_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Presented {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presented")
            .field("secure", &self.secure)
            .field("wrapper", &self.wrapper)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

/// Result of offering a socket to a wrapper.
///
/// A declining wrapper returns ownership of the socket so the chain can offer
/// it to the next wrapper.
pub enum WrapOutcome {
    Accepted(Presented),
    Declined(Box<dyn Socket>),
}

/// Inspects a raw connection and optionally decorates it.
///
/// Implementations hold configuration only (e.g. a TLS context); they must be
/// callable concurrently from many connection workers.
pub trait PresentationWrapper: Send + Sync {
    fn name(&self) -> &'static str;

    fn wrap(&self, socket: Box<dyn Socket>) -> WrapOutcome;
}

/// Catch-all wrapper: accepts everything, leaves the connection unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWrapper;

impl NullWrapper {
    /// Infallible form used by the chain's fallback.
    pub fn present(&self, socket: Box<dyn Socket>) -> Presented {
        let peer_addr = socket.peer_addr();
        Presented {
            stream: Box::new(socket),
            secure: false,
            wrapper: self.name(),
            peer_addr,
        }
    }
}

impl PresentationWrapper for NullWrapper {
    fn name(&self) -> &'static str {
        "null"
    }

    fn wrap(&self, socket: Box<dyn Socket>) -> WrapOutcome {
        WrapOutcome::Accepted(self.present(socket))
    }
}
