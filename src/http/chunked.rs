//! Chunked transfer coding.
//!
//! # Responsibilities
//! - Frame an outgoing body as `size\r\ndata\r\n` chunks ending in `0\r\n`
//! - Write the trailer block exactly once after the last chunk
//! - Decode incoming chunks and hand the parsed trailer to the receiver

use std::io::{self, BufRead, Read, Write};

use crate::error::Error;
use crate::http::codec;
use crate::http::trailer::Trailer;

/// Payload bytes buffered before a chunk is emitted.
pub const CHUNK_SIZE: usize = 16 * 1024;

const MAX_SIZE_LINE: u64 = 1024;

/// Writes a chunked body. Dropping the writer finishes the body.
pub struct ChunkedWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    trailer: Option<Trailer>,
    written: u64,
    finished: bool,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W, trailer: Option<Trailer>) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(CHUNK_SIZE),
            trailer,
            written: 0,
            finished: false,
        }
    }

    /// Payload bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn emit_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        write!(self.inner, "{:x}\r\n", self.buf.len())?;
        self.inner.write_all(&self.buf)?;
        self.inner.write_all(b"\r\n")?;
        self.buf.clear();
        Ok(())
    }

    /// Write any buffered data, the last chunk, and the trailer.
    ///
    /// Calling again is a no-op.
    pub fn finish(&mut self) -> io::Result<u64> {
        if self.finished {
            return Ok(self.written);
        }
        self.finished = true;
        self.emit_chunk()?;
        self.inner.write_all(b"0\r\n")?;
        if let Some(trailer) = &self.trailer {
            codec::write_fields(&trailer.finalize(), &mut self.inner)?;
        }
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "chunked body already finished",
            ));
        }
        let room = CHUNK_SIZE - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        self.written += n as u64;
        if self.buf.len() == CHUNK_SIZE {
            self.emit_chunk()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_chunk()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for ChunkedWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish() {
                tracing::debug!(error = %e, "Failed to finish chunked body on drop");
            }
        }
    }
}

/// Reads a chunked body, stopping after the last chunk and trailer.
pub struct ChunkedReader<R: BufRead> {
    inner: R,
    remaining: u64,
    total: u64,
    done: bool,
    trailer: Option<Trailer>,
}

impl<R: BufRead> ChunkedReader<R> {
    pub fn new(inner: R, trailer: Option<Trailer>) -> Self {
        Self {
            inner,
            remaining: 0,
            total: 0,
            done: false,
            trailer,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn read_size_line(&mut self) -> io::Result<u64> {
        let mut line = Vec::new();
        (&mut self.inner).take(MAX_SIZE_LINE).read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            return Err(invalid("truncated chunk size line"));
        }
        let text = std::str::from_utf8(&line).map_err(|_| invalid("chunk size is not ASCII"))?;
        // chunk extensions are ignored
        let size = text.trim().split(';').next().unwrap_or("").trim();
        u64::from_str_radix(size, 16).map_err(|_| invalid(format!("bad chunk size {:?}", size)))
    }

    fn read_crlf(&mut self) -> io::Result<()> {
        let mut end = [0u8; 2];
        self.inner.read_exact(&mut end[..1])?;
        if end[0] == b'\r' {
            self.inner.read_exact(&mut end[1..])?;
        } else {
            end[1] = end[0];
        }
        if end[1] != b'\n' {
            return Err(invalid("missing CRLF after chunk data"));
        }
        Ok(())
    }

    fn read_trailer(&mut self) -> io::Result<()> {
        let fields = codec::read_fields(&mut self.inner).map_err(into_io)?;
        if let Some(trailer) = &self.trailer {
            trailer.set_received(fields, self.total);
        }
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let size = self.read_size_line()?;
            if size == 0 {
                self.read_trailer()?;
                self.done = true;
                return Ok(0);
            }
            self.remaining = size;
        }

        let want = (self.remaining.min(buf.len() as u64)) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunk",
            ));
        }
        self.remaining -= n as u64;
        self.total += n as u64;
        if self.remaining == 0 {
            self.read_crlf()?;
        }
        Ok(n)
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Carry a crate error through an `io::Read` boundary.
pub(crate) fn into_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encodes_chunks_and_trailer() {
        let trailer = Trailer::new();
        trailer.set_field("X-Sum", "5").unwrap();
        let mut out = Vec::new();
        {
            let mut w = ChunkedWriter::new(&mut out, Some(trailer.clone()));
            w.write_all(b"hello").unwrap();
            assert_eq!(w.finish().unwrap(), 5);
            assert_eq!(w.finish().unwrap(), 5);
        }
        assert_eq!(out, b"5\r\nhello\r\n0\r\nX-Sum: 5\r\n\r\n");
        assert!(trailer.is_finalized());
    }

    #[test]
    fn empty_body_is_just_last_chunk() {
        let mut out = Vec::new();
        drop(ChunkedWriter::new(&mut out, None));
        assert_eq!(out, b"0\r\n\r\n");
    }

    #[test]
    fn decodes_large_body_with_trailer() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let sent = Trailer::new();
        sent.set_field("X-Len", payload.len().to_string()).unwrap();

        let mut wire = Vec::new();
        {
            let mut w = ChunkedWriter::new(&mut wire, Some(sent));
            w.write_all(&payload).unwrap();
        }
        wire.extend_from_slice(b"NEXT");

        let received = Trailer::new();
        let mut input = Cursor::new(wire);
        let mut body = Vec::new();
        {
            let mut r = ChunkedReader::new(&mut input, Some(received.clone()));
            r.read_to_end(&mut body).unwrap();
            assert!(r.is_done());
        }
        assert_eq!(body, payload);
        assert_eq!(received.field("x-len").as_deref(), Some("100000"));
        assert_eq!(received.content_length(), Some(100_000));

        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "NEXT");
    }

    #[test]
    fn bad_size_is_invalid_data() {
        let mut r = ChunkedReader::new(Cursor::new(b"zz\r\n".to_vec()), None);
        let err = r.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
