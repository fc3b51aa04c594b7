//! TLS / SSL sniffing wrapper.
//!
//! # Responsibilities
//! - Peek the first five bytes of a connection under a short, bounded timeout
//! - Classify them as a TLS 1.x handshake record or an SSLv2/v3 client hello
//! - Terminate TLS in server mode when the classification matches
//!
//! # Design Decisions
//! - The caller's receive timeout is restored on every path, including errors
//! - Any peek failure declines; the socket is handed back with no bytes consumed

use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::{ServerConfig, ServerConnection, StreamOwned};

use crate::net::{Socket, Stream};
use crate::presentation::wrapper::{Presented, PresentationWrapper, WrapOutcome};

/// Bytes needed to classify a record header.
pub const DETECT_BYTES: usize = 5;

/// Result of looking at a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Content type 22 (handshake), major version 3.
    TlsHandshake,
    /// SSLv2-style record carrying a client hello.
    SslClientHello { version: u8, record_length: u16 },
    /// Anything else (plain text protocols land here).
    Unknown,
}

impl Classification {
    pub fn is_secure(&self) -> bool {
        !matches!(self, Classification::Unknown)
    }
}

/// Classify the first bytes of a connection.
pub fn classify(header: &[u8; DETECT_BYTES]) -> Classification {
    if header[0] == 0x16 && header[1] == 0x03 {
        return Classification::TlsHandshake;
    }

    // SSLv2 record header: 2 bytes when the high bit is set, else 3 (with padding)
    let (header_length, record_length) = if header[0] & 0x80 != 0 {
        (2, (u16::from(header[0] & 0x7F) << 8) | u16::from(header[1]))
    } else {
        (3, (u16::from(header[0] & 0x3F) << 8) | u16::from(header[1]))
    };

    let client_hello = header[header_length];
    let mut version = header.get(header_length + 1).copied().unwrap_or(0);
    if version == 0 {
        version = header.get(header_length + 2).copied().unwrap_or(0);
    }

    if client_hello == 1 && (version == 2 || version == 3) {
        Classification::SslClientHello { version, record_length }
    } else {
        Classification::Unknown
    }
}

/// Peek until `DETECT_BYTES` are buffered, the peer closes, or `timeout` elapses.
///
/// Returns `Ok(None)` when the peer closed before sending enough bytes.
pub fn peek_record_header(
    socket: &dyn Socket,
    timeout: Duration,
    interval: Duration,
) -> io::Result<Option<[u8; DETECT_BYTES]>> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; DETECT_BYTES];
    loop {
        let n = socket.peek(&mut buf)?;
        if n >= DETECT_BYTES {
            return Ok(Some(buf));
        }
        if n == 0 {
            return Ok(None);
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(ErrorKind::TimedOut, "detection peek timed out"));
        }
        std::thread::sleep(interval);
    }
}

/// Applies a security layer to a socket classified as TLS.
pub trait SecureDecorator: Send + Sync {
    /// On failure the socket is handed back so the chain can continue.
    fn decorate(
        &self,
        socket: Box<dyn Socket>,
    ) -> Result<Box<dyn Stream>, (io::Error, Box<dyn Socket>)>;
}

/// Server-mode TLS termination with rustls.
#[derive(Clone)]
pub struct RustlsTerminator {
    config: Arc<ServerConfig>,
}

impl RustlsTerminator {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}

impl SecureDecorator for RustlsTerminator {
    fn decorate(
        &self,
        socket: Box<dyn Socket>,
    ) -> Result<Box<dyn Stream>, (io::Error, Box<dyn Socket>)> {
        match ServerConnection::new(Arc::clone(&self.config)) {
            Ok(conn) => Ok(Box::new(StreamOwned::new(conn, socket))),
            Err(e) => Err((io::Error::other(e), socket)),
        }
    }
}

/// Wrapper that detects TLS/SSL client hellos and terminates them.
pub struct TlsSniffWrapper<D = RustlsTerminator> {
    decorator: D,
    timeout: Duration,
    interval: Duration,
}

impl TlsSniffWrapper<RustlsTerminator> {
    pub fn with_rustls(config: Arc<ServerConfig>, timeout: Duration) -> Self {
        Self::new(RustlsTerminator::new(config), timeout)
    }
}

impl<D: SecureDecorator> TlsSniffWrapper<D> {
    pub fn new(decorator: D, timeout: Duration) -> Self {
        Self {
            decorator,
            timeout,
            interval: Duration::from_millis(10),
        }
    }

    /// Pause between peeks while fewer than five bytes are buffered.
    pub fn with_peek_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Classify the socket, restoring its receive timeout afterwards.
    ///
    /// Errors are absorbed into `Unknown`.
    fn detect(&self, socket: &dyn Socket) -> Classification {
        let saved = match socket.read_timeout() {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(error = %e, "Could not read receive timeout, skipping detection");
                return Classification::Unknown;
            }
        };

        let peeked = socket
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| peek_record_header(socket, self.timeout, self.interval));

        if let Err(e) = socket.set_read_timeout(saved) {
            tracing::warn!(error = %e, "Failed to restore receive timeout after detection");
        }

        match peeked {
            Ok(Some(header)) => {
                let class = classify(&header);
                tracing::trace!(header = ?header, classification = ?class, "Record header sniffed");
                class
            }
            Ok(None) => {
                tracing::debug!("Peer closed before sending a record header");
                Classification::Unknown
            }
            Err(e) => {
                tracing::debug!(error = %e, "Detection peek failed, declining");
                Classification::Unknown
            }
        }
    }
}

impl<D: SecureDecorator> PresentationWrapper for TlsSniffWrapper<D> {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn wrap(&self, socket: Box<dyn Socket>) -> WrapOutcome {
        let classification = self.detect(socket.as_ref());
        if !classification.is_secure() {
            return WrapOutcome::Declined(socket);
        }

        let peer_addr = socket.peer_addr();
        match self.decorator.decorate(socket) {
            Ok(stream) => {
                tracing::debug!(peer_addr = ?peer_addr, classification = ?classification, "Secure connection detected");
                WrapOutcome::Accepted(Presented {
                    stream,
                    secure: true,
                    wrapper: self.name(),
                    peer_addr,
                })
            }
            Err((e, socket)) => {
                tracing::warn!(error = %e, "TLS termination could not start, declining");
                WrapOutcome::Declined(socket)
            }
        }
    }
}
