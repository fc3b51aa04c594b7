//! Header line codec.
//!
//! # Responsibilities
//! - Serialize a header as start line, `Name: value\r\n` fields, blank line
//! - Parse the same from a buffered reader with a bounded size
//! - Read and write bare field blocks (chunked trailers)

use std::io::{self, BufRead, Read, Write};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};

use crate::error::{Error, Result};
use crate::http::header::{version_str, Header, StartLine};

/// Upper bound for a start line plus fields.
pub const MAX_HEADER_BYTES: u64 = 64 * 1024;

/// Write a full header, including the terminating blank line.
pub fn write_header<W: Write + ?Sized>(header: &Header, out: &mut W) -> io::Result<()> {
    let mut buf = Vec::with_capacity(256);
    match header.start_line() {
        StartLine::Request { method, path, version } => {
            write!(buf, "{} {} {}\r\n", method, path, version_str(*version))?;
        }
        StartLine::Response { version, status, .. } => {
            write!(
                buf,
                "{} {} {}\r\n",
                version_str(*version),
                status.as_u16(),
                header.reason().unwrap_or("")
            )?;
        }
    }
    write_fields(header.fields(), &mut buf)?;
    buf.extend_from_slice(b"\r\n");
    out.write_all(&buf)
}

/// Write `Name: value\r\n` for every field, without a terminating blank line.
pub fn write_fields<W: Write + ?Sized>(fields: &HeaderMap, out: &mut W) -> io::Result<()> {
    for (name, value) in fields {
        out.write_all(canonical_name(name.as_str()).as_bytes())?;
        out.write_all(b": ")?;
        out.write_all(value.as_bytes())?;
        out.write_all(b"\r\n")?;
    }
    Ok(())
}

/// `content-type` → `Content-Type`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Read one header. `Ok(None)` means the peer closed before sending anything.
pub fn read_header<R: BufRead + ?Sized>(input: &mut R) -> Result<Option<Header>> {
    let mut budget = MAX_HEADER_BYTES;

    let first = loop {
        match read_line(input, &mut budget)? {
            None => return Ok(None),
            // tolerate stray CRLF between pipelined messages
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };

    let start = parse_start_line(&first)?;
    let fields = read_field_block(input, &mut budget)?;
    Ok(Some(Header::from_parts(start, fields)))
}

/// Read fields up to and including the blank line.
pub fn read_fields<R: BufRead + ?Sized>(input: &mut R) -> Result<HeaderMap> {
    let mut budget = MAX_HEADER_BYTES;
    read_field_block(input, &mut budget)
}

fn read_field_block<R: BufRead + ?Sized>(input: &mut R, budget: &mut u64) -> Result<HeaderMap> {
    let mut fields = HeaderMap::new();
    loop {
        let line = read_line(input, budget)?
            .ok_or_else(|| Error::bad_header("connection closed inside header"))?;
        if line.is_empty() {
            return Ok(fields);
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(Error::bad_header("folded header lines are not supported"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::bad_header(format!("missing ':' in {:?}", line)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::bad_header(format!("invalid field name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| Error::bad_header(format!("invalid value for {}: {}", name, e)))?;
        fields.append(name, value);
    }
}

/// One CRLF (or LF) terminated line without its terminator.
fn read_line<R: BufRead + ?Sized>(input: &mut R, budget: &mut u64) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *input).take(*budget).read_until(b'\n', &mut buf)?;
    if n == 0 {
        if *budget == 0 {
            return Err(Error::bad_header("header too large"));
        }
        return Ok(None);
    }
    *budget -= n as u64;
    if buf.last() != Some(&b'\n') {
        if *budget == 0 {
            return Err(Error::bad_header("header too large"));
        }
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        )));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| Error::bad_header("header is not valid UTF-8"))
}

fn parse_version(text: &str) -> Result<Version> {
    match text {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/0.9" => Ok(Version::HTTP_09),
        "HTTP/2" | "HTTP/2.0" => Ok(Version::HTTP_2),
        "HTTP/3" | "HTTP/3.0" => Ok(Version::HTTP_3),
        other => Err(Error::bad_header(format!("unknown version {:?}", other))),
    }
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    if line.starts_with("HTTP/") {
        let mut parts = line.splitn(3, ' ');
        let version = parse_version(parts.next().unwrap_or(""))?;
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| Error::bad_header(format!("bad status line {:?}", line)))?;
        let status = StatusCode::from_u16(code)
            .map_err(|_| Error::bad_header(format!("bad status code {}", code)))?;
        let reason = parts.next().map(str::to_string).filter(|r| !r.is_empty());
        return Ok(StartLine::Response { version, status, reason });
    }

    let mut parts = line.split_whitespace();
    let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v), None) => (m, p, v),
        _ => return Err(Error::bad_header(format!("bad request line {:?}", line))),
    };
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::bad_header(format!("bad method {:?}", method)))?;
    Ok(StartLine::Request {
        method,
        path: path.to_string(),
        version: parse_version(version)?,
    })
}
