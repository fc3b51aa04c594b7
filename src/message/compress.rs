//! Streaming compression adapters for message bodies.
//!
//! # Design Decisions
//! - Compressors wrap a `BodyWriter`; finishing flushes the compressor
//!   trailer first, then finishes the framing underneath
//! - One inflater serves both `deflate` and `gzip`: it sniffs the gzip magic
//!   on the first bytes and falls back to zlib framing

use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::bufread::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::http::BodyWriter;
use crate::message::content_type::ContentEncoding;

const GZIP_MAGIC: u8 = 0x1f;

enum Encoder<'a> {
    Deflate(ZlibEncoder<Box<dyn BodyWriter + 'a>>),
    Gzip(GzEncoder<Box<dyn BodyWriter + 'a>>),
}

/// Compresses everything written before handing it to the body stream.
pub struct CompressingWriter<'a> {
    encoder: Encoder<'a>,
}

impl<'a> CompressingWriter<'a> {
    pub fn new(inner: Box<dyn BodyWriter + 'a>, encoding: ContentEncoding) -> Self {
        let encoder = match encoding {
            ContentEncoding::Deflate => Encoder::Deflate(ZlibEncoder::new(inner, Compression::default())),
            ContentEncoding::Gzip => Encoder::Gzip(GzEncoder::new(inner, Compression::default())),
        };
        Self { encoder }
    }
}

impl Write for CompressingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.encoder {
            Encoder::Deflate(e) => e.write(buf),
            Encoder::Gzip(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.encoder {
            Encoder::Deflate(e) => e.flush(),
            Encoder::Gzip(e) => e.flush(),
        }
    }
}

impl BodyWriter for CompressingWriter<'_> {
    /// Returns the compressed byte count written to the body stream.
    fn finish(&mut self) -> io::Result<u64> {
        match &mut self.encoder {
            Encoder::Deflate(e) => {
                e.try_finish()?;
                e.get_mut().finish()
            }
            Encoder::Gzip(e) => {
                e.try_finish()?;
                e.get_mut().finish()
            }
        }
    }
}

/// Wrap a body writer with the compressor for `encoding`.
pub fn compress<'a>(inner: Box<dyn BodyWriter + 'a>, encoding: ContentEncoding) -> Box<dyn BodyWriter + 'a> {
    Box::new(CompressingWriter::new(inner, encoding))
}

enum InflateState<'a> {
    Pending(BufReader<Box<dyn Read + 'a>>),
    Gzip(MultiGzDecoder<BufReader<Box<dyn Read + 'a>>>),
    Zlib(ZlibDecoder<BufReader<Box<dyn Read + 'a>>>),
    Empty,
    Poisoned,
}

/// Inflates zlib or gzip framed input, decided by the first byte.
pub struct Inflater<'a> {
    state: InflateState<'a>,
}

impl<'a> Inflater<'a> {
    pub fn new(inner: Box<dyn Read + 'a>) -> Self {
        Self {
            state: InflateState::Pending(BufReader::new(inner)),
        }
    }

    fn select(&mut self) -> io::Result<()> {
        let mut reader = match std::mem::replace(&mut self.state, InflateState::Poisoned) {
            InflateState::Pending(r) => r,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let first = reader.fill_buf()?.first().copied();
        self.state = match first {
            None => InflateState::Empty,
            Some(GZIP_MAGIC) => InflateState::Gzip(MultiGzDecoder::new(reader)),
            Some(_) => InflateState::Zlib(ZlibDecoder::new(reader)),
        };
        Ok(())
    }
}

impl Read for Inflater<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if matches!(self.state, InflateState::Pending(_)) {
            self.select()?;
        }
        match &mut self.state {
            InflateState::Gzip(d) => d.read(buf),
            InflateState::Zlib(d) => d.read(buf),
            InflateState::Empty => Ok(0),
            InflateState::Pending(_) | InflateState::Poisoned => Err(io::Error::new(
                io::ErrorKind::Other,
                "inflater failed while detecting framing",
            )),
        }
    }
}

/// Wrap a body reader with transparent zlib/gzip inflation.
pub fn decompress<'a>(inner: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
    Box::new(Inflater::new(inner))
}
