//! The `Connection` collaborator the message transport talks to.
//!
//! # Responsibilities
//! - Send and receive message headers
//! - Hand out body streams framed according to the header
//! - Count bytes in both directions for observability
//!
//! # Design Decisions
//! - Body streams mutably borrow the connection, so the borrow checker
//!   enforces one body in flight per direction
//! - Reads go through one `BufReader` that outlives individual messages, so
//!   bytes buffered past one message are kept for the next (keep-alive)

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::http::chunked::{ChunkedReader, ChunkedWriter};
use crate::http::codec;
use crate::http::header::Header;
use crate::http::trailer::Trailer;

/// An outgoing body stream.
///
/// `finish` completes the framing (last chunk and trailer for chunked
/// bodies) and returns the number of payload bytes written.
pub trait BodyWriter: Write {
    fn finish(&mut self) -> io::Result<u64>;
}

impl<W: Write> BodyWriter for ChunkedWriter<W> {
    fn finish(&mut self) -> io::Result<u64> {
        ChunkedWriter::finish(self)
    }
}

impl<B: BodyWriter + ?Sized> BodyWriter for Box<B> {
    fn finish(&mut self) -> io::Result<u64> {
        (**self).finish()
    }
}

/// A bidirectional message connection.
pub trait Connection: Send {
    fn send_header(&mut self, header: &Header) -> Result<()>;

    /// `Ok(None)` when the peer closed cleanly before a new header.
    fn receive_header(&mut self) -> Result<Option<Header>>;

    /// Body output stream framed according to `header`.
    fn body_writer<'a>(
        &'a mut self,
        header: &Header,
        trailer: Option<Trailer>,
    ) -> Result<Box<dyn BodyWriter + 'a>>;

    /// Body input stream framed according to `header`.
    ///
    /// Dropping the reader leaves the connection open.
    fn body_reader<'a>(
        &'a mut self,
        header: &Header,
        trailer: Option<Trailer>,
    ) -> Result<Box<dyn Read + 'a>>;

    fn is_secure(&self) -> bool;

    fn peer_addr(&self) -> Option<SocketAddr>;

    fn bytes_sent(&self) -> u64;

    fn bytes_received(&self) -> u64;
}

/// Counts bytes moving through a stream.
struct Counted<S> {
    inner: S,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl<S: Read> Read for Counted<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.received.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl<S: Write> Write for Counted<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.sent.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// HTTP/1.x connection over any byte stream.
pub struct HttpConnection<S> {
    io: BufReader<Counted<S>>,
    secure: bool,
    peer_addr: Option<SocketAddr>,
}

impl<S: Read + Write + Send> HttpConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            io: BufReader::new(Counted {
                inner: stream,
                sent: Arc::new(AtomicU64::new(0)),
                received: Arc::new(AtomicU64::new(0)),
            }),
            secure: false,
            peer_addr: None,
        }
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_peer_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.peer_addr = addr;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.io.get_ref().inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io.get_mut().inner
    }

    /// Bytes received but not yet consumed by a header or body read.
    pub fn buffered(&self) -> usize {
        self.io.buffer().len()
    }
}

impl<S: Read + Write + Send> Connection for HttpConnection<S> {
    fn send_header(&mut self, header: &Header) -> Result<()> {
        let out = self.io.get_mut();
        codec::write_header(header, out)?;
        out.flush()?;
        Ok(())
    }

    fn receive_header(&mut self) -> Result<Option<Header>> {
        codec::read_header(&mut self.io)
    }

    fn body_writer<'a>(
        &'a mut self,
        header: &Header,
        trailer: Option<Trailer>,
    ) -> Result<Box<dyn BodyWriter + 'a>> {
        let out = self.io.get_mut();
        if header.is_chunked() {
            return Ok(Box::new(ChunkedWriter::new(out, trailer)));
        }
        match header.content_length() {
            Some(limit) => Ok(Box::new(LengthWriter { inner: out, limit, written: 0 })),
            None => Ok(Box::new(CloseDelimitedWriter { inner: out, written: 0 })),
        }
    }

    fn body_reader<'a>(
        &'a mut self,
        header: &Header,
        trailer: Option<Trailer>,
    ) -> Result<Box<dyn Read + 'a>> {
        if header.is_chunked() {
            return Ok(Box::new(ChunkedReader::new(&mut self.io, trailer)));
        }
        if let Some(len) = header.content_length() {
            return Ok(Box::new(LengthReader {
                inner: (&mut self.io).take(len),
                expected: len,
            }));
        }
        if header.is_response() && header.has_content() {
            return Ok(Box::new(&mut self.io));
        }
        Ok(Box::new(io::empty()))
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn bytes_sent(&self) -> u64 {
        self.io.get_ref().sent.load(Ordering::Relaxed)
    }

    fn bytes_received(&self) -> u64 {
        self.io.get_ref().received.load(Ordering::Relaxed)
    }
}

/// Body with a declared Content-Length.
struct LengthWriter<W> {
    inner: W,
    limit: u64,
    written: u64,
}

impl<W: Write> Write for LengthWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit - self.written;
        if room == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "body exceeds declared Content-Length",
            ));
        }
        let take = (buf.len() as u64).min(room) as usize;
        let n = self.inner.write(&buf[..take])?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> BodyWriter for LengthWriter<W> {
    fn finish(&mut self) -> io::Result<u64> {
        self.inner.flush()?;
        if self.written != self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "body ended after {} of {} declared bytes",
                    self.written, self.limit
                ),
            ));
        }
        Ok(self.written)
    }
}

/// Body delimited by closing the connection.
struct CloseDelimitedWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CloseDelimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> BodyWriter for CloseDelimitedWriter<W> {
    fn finish(&mut self) -> io::Result<u64> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

/// Fails on early EOF instead of silently truncating.
struct LengthReader<R> {
    inner: io::Take<R>,
    expected: u64,
}

impl<R: BufRead> Read for LengthReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && self.inner.limit() > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "connection closed after {} of {} body bytes",
                    self.expected - self.inner.limit(),
                    self.expected
                ),
            ));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::io::Cursor;

    /// Reads from a fixed input and records everything written.
    struct Loop {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Loop {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loop {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn conn(input: &[u8]) -> HttpConnection<Loop> {
        HttpConnection::new(Loop { input: Cursor::new(input.to_vec()), output: Vec::new() })
    }

    #[test]
    fn keep_alive_requests_share_buffer() {
        let mut c = conn(b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\n\r\n");
        let first = c.receive_header().unwrap().unwrap();
        let mut body = String::new();
        c.body_reader(&first, None).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "abc");

        let second = c.receive_header().unwrap().unwrap();
        assert_eq!(second.path(), Some("/b"));
        let mut empty = Vec::new();
        c.body_reader(&second, None).unwrap().read_to_end(&mut empty).unwrap();
        assert!(empty.is_empty());
        assert!(c.receive_header().unwrap().is_none());
    }

    #[test]
    fn length_writer_enforces_declared_length() {
        let mut c = conn(b"");
        let mut header = Header::response(StatusCode::OK);
        header.set_field("Content-Length", "4").unwrap();
        c.send_header(&header).unwrap();
        {
            let mut w = c.body_writer(&header, None).unwrap();
            w.write_all(b"ab").unwrap();
            assert!(w.finish().is_err());
            w.write_all(b"cd").unwrap();
            assert_eq!(w.finish().unwrap(), 4);
            assert!(w.write_all(b"e").is_err());
        }
        let out = String::from_utf8(c.get_ref().output.clone()).unwrap();
        assert!(out.ends_with("\r\n\r\nabcd"));
        assert_eq!(c.bytes_sent(), out.len() as u64);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut c = conn(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort");
        let header = c.receive_header().unwrap().unwrap();
        let err = c
            .body_reader(&header, None)
            .unwrap()
            .read_to_end(&mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn response_without_framing_reads_to_close() {
        let mut c = conn(b"HTTP/1.0 200 OK\r\n\r\nall of it");
        let header = c.receive_header().unwrap().unwrap();
        let mut body = String::new();
        c.body_reader(&header, None).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "all of it");
    }

    #[test]
    fn request_header_roundtrip_counts_bytes() {
        let mut c = conn(b"");
        let header = Header::request(Method::GET, "/x");
        c.send_header(&header).unwrap();
        assert_eq!(c.bytes_sent(), "GET /x HTTP/1.1\r\n\r\n".len() as u64);
        assert_eq!(c.bytes_received(), 0);
    }
}
