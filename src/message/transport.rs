//! Message transport: sending and receiving a `Message` over a `Connection`.
//!
//! # Responsibilities
//! - Apply custom headers and pick chunked framing for bodies of unknown length
//! - Compress chunked bodies that declare `deflate` or `gzip`
//! - Marshal structured values as json, xml or form
//! - Inflate compressed bodies on receive and turn error responses into `Error::Remote`
//!
//! # Data Flow
//! ```text
//! send:    custom headers → Connection::send_header → body writer
//!              → [compressor] → value writer | source copy → finish (trailer)
//! receive: Connection::body_reader → [inflater] → value reader | sink copy
//! ```

use std::io::{self, Read, Write};
use std::time::Instant;

use http::header::{CONNECTION, CONTENT_LENGTH, TE, TRANSFER_ENCODING};
use http::{StatusCode, Version};

use crate::error::{Error, RemoteError, Result};
use crate::http::{BodyWriter, Connection, Header, Trailer};
use crate::message::compress::{compress, decompress};
use crate::message::content_type::{ContentEncoding, ContentKind};
use crate::message::envelope::{Content, CustomHeader, Message};
use crate::message::state::MessageState;
use crate::observability::metrics;
use crate::value::Value;

/// Bytes of a non-structured error body kept in `RemoteError::details`.
const MAX_ERROR_TEXT: u64 = 4096;

/// Body stream returned by [`Message::send_header`].
///
/// Call [`finish`](OutgoingBody::finish) to end the body; for chunked bodies
/// that writes the last chunk and the trailer.
pub struct OutgoingBody<'a> {
    writer: Box<dyn BodyWriter + 'a>,
    trailer: Option<Trailer>,
    state: &'a mut MessageState,
    started: Instant,
}

impl OutgoingBody<'_> {
    /// Trailer for a chunked body. Fields may be set until `finish`.
    pub fn trailer(&self) -> Option<&Trailer> {
        self.trailer.as_ref()
    }

    /// End the body. Returns the bytes written to the framing layer.
    pub fn finish(mut self) -> Result<u64> {
        match self.writer.finish() {
            Ok(bytes) => {
                *self.state = MessageState::Complete;
                let elapsed = self.started.elapsed();
                metrics::record_send(bytes, elapsed);
                tracing::debug!(
                    bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    trailer = ?self.trailer.as_ref().map(Trailer::fields),
                    "Sent content"
                );
                Ok(bytes)
            }
            Err(e) => {
                *self.state = MessageState::Failed;
                Err(e.into())
            }
        }
    }
}

impl Write for OutgoingBody<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf).inspect_err(|_| *self.state = MessageState::Failed)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().inspect_err(|_| *self.state = MessageState::Failed)
    }
}

/// Counts decoded bytes pulled through a reader.
struct Counting<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl Message {
    /// Copy custom headers into `header` and pick the body framing.
    ///
    /// With a value or source to send and no Content-Length, responses
    /// (except HTTP/1.0) and requests switch to chunked. Requests also
    /// advertise trailer support through `Connection` and `TE`.
    pub fn add_custom_headers(&self, header: &mut Header) -> Result<()> {
        for (name, value) in self.custom_headers() {
            match value {
                CustomHeader::Single(v) => header.set_field(name, v)?,
                CustomHeader::Multiple(values) => {
                    for v in values {
                        header.add_field(name, v)?;
                    }
                }
            }
        }

        if !(self.has_value() || self.has_source()) {
            return Ok(());
        }

        if header.is_response() {
            if header.version() != Version::HTTP_10 && !header.has_field(CONTENT_LENGTH.as_str()) {
                header.set_field(TRANSFER_ENCODING.as_str(), "chunked")?;
            }
            return Ok(());
        }

        let mut connection = header
            .field(CONNECTION.as_str())
            .unwrap_or_default()
            .to_string();
        if connection.is_empty() {
            connection = "close".to_string();
        }
        if !connection.contains(", TE") {
            connection.push_str(", TE");
        }
        header.set_field(CONNECTION.as_str(), connection)?;
        header.set_field(TE.as_str(), "trailers, chunked")?;
        if !header.has_field(CONTENT_LENGTH.as_str()) {
            header.set_field(TRANSFER_ENCODING.as_str(), "chunked")?;
        }
        Ok(())
    }

    /// Send `header` and return the body stream for manual writing.
    pub fn send_header<'a, C: Connection + ?Sized>(
        &'a mut self,
        conn: &'a mut C,
        header: &mut Header,
    ) -> Result<OutgoingBody<'a>> {
        self.add_custom_headers(header)?;
        self.open_body(conn, header)
    }

    fn open_body<'a, C: Connection + ?Sized>(
        &'a mut self,
        conn: &'a mut C,
        header: &Header,
    ) -> Result<OutgoingBody<'a>> {
        if let Err(e) = conn.send_header(header) {
            self.set_state(MessageState::Failed);
            return Err(e);
        }
        self.set_state(MessageState::HeaderSent);
        tracing::debug!(peer = ?conn.peer_addr(), header = ?header.start_line(), fields = ?header.fields(), "Sent header");

        let chunked = header.is_chunked();
        let trailer = chunked.then(|| self.trailer_handle());
        let mut writer = match conn.body_writer(header, trailer.clone()) {
            Ok(w) => w,
            Err(e) => {
                self.set_state(MessageState::Failed);
                return Err(e);
            }
        };
        if chunked {
            if let Some(encoding) = ContentEncoding::from_header(header) {
                writer = compress(writer, encoding);
            }
        }

        self.set_state(MessageState::BodyStreaming);
        Ok(OutgoingBody {
            writer,
            trailer,
            state: self.state_mut(),
            started: Instant::now(),
        })
    }

    /// Send the header and the whole body: the value, or the source stream.
    ///
    /// A value whose Content-Type is not json, xml or form fails with
    /// `InvalidContentType` before anything is written.
    pub fn send<C: Connection + ?Sized>(&mut self, conn: &mut C, header: &mut Header) -> Result<u64> {
        self.add_custom_headers(header)?;
        let kind = match self.content() {
            Content::Value(_) => Some(ContentKind::from_header(header)?),
            _ => None,
        };

        let mut content = self.take_content();
        let result = self.send_content(conn, header, &mut content, kind);
        *self.content_mut() = content;
        if result.is_err() {
            self.set_state(MessageState::Failed);
        }
        result
    }

    fn send_content<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        header: &Header,
        content: &mut Content,
        kind: Option<ContentKind>,
    ) -> Result<u64> {
        let mut body = self.open_body(conn, header)?;
        match (content, kind) {
            (Content::Value(value), Some(kind)) => kind.writer().write_value(value, &mut body)?,
            (Content::Source(source), _) => {
                io::copy(source, &mut body)?;
            }
            _ => {}
        }
        body.finish()
    }

    /// Pull-style body stream for a header that was already received.
    ///
    /// Compressed bodies are inflated. Dropping the stream leaves the
    /// connection open.
    pub fn content_reader<'a, C: Connection + ?Sized>(
        &mut self,
        conn: &'a mut C,
        header: &Header,
    ) -> Result<Box<dyn Read + 'a>> {
        let trailer = header.is_chunked().then(|| self.trailer_handle());
        let reader = conn.body_reader(header, trailer)?;
        self.set_state(MessageState::BodyStreaming);
        Ok(match ContentEncoding::from_header(header) {
            Some(_) => decompress(reader),
            None => reader,
        })
    }

    /// Receive the body announced by `header` into the message.
    ///
    /// Value mode decodes a structured value; sink mode streams into the
    /// sink; otherwise the body is left unread. Responses with status 400
    /// or above are always decoded as a value and returned as
    /// `Error::Remote`, leaving the sink untouched.
    pub fn receive_content<C: Connection + ?Sized>(&mut self, conn: &mut C, header: &Header) -> Result<()> {
        if let Some(status) = header.status() {
            if status.as_u16() >= 400 {
                return Err(self.receive_error(conn, header, status));
            }
        }

        if !header.has_content() {
            self.set_state(MessageState::Complete);
            return Ok(());
        }

        let result = match self.take_content() {
            Content::Value(_) => {
                let received = ContentKind::from_header(header)
                    .and_then(|kind| self.read_value(conn, header, kind));
                match received {
                    Ok(value) => {
                        self.set_value(value);
                        Ok(())
                    }
                    Err(e) => {
                        self.set_value(Value::Null);
                        Err(e)
                    }
                }
            }
            Content::Sink { mut sink, close_on_finish } => {
                let result = self.read_stream(conn, header, &mut sink);
                if close_on_finish {
                    let flushed = sink.flush();
                    drop(sink);
                    result.and_then(|()| flushed.map_err(Error::from))
                } else {
                    *self.content_mut() = Content::Sink { sink, close_on_finish };
                    result
                }
            }
            other => {
                *self.content_mut() = other;
                Ok(())
            }
        };

        self.set_state(if result.is_ok() {
            MessageState::Complete
        } else {
            MessageState::Failed
        });
        result
    }

    fn read_value<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        header: &Header,
        kind: ContentKind,
    ) -> Result<Value> {
        let started = Instant::now();
        let mut reader = Counting {
            inner: self.content_reader(conn, header)?,
            count: 0,
        };
        let decoded = kind.reader().read_value(&mut reader);
        // xml stops at the root element and a decode error stops anywhere;
        // the rest of the body must still go so the connection stays framed
        io::copy(&mut reader, &mut io::sink())?;
        let value = decoded?;

        let elapsed = started.elapsed();
        metrics::record_receive(reader.count, elapsed);
        tracing::debug!(
            bytes = reader.count,
            elapsed_ms = elapsed.as_millis() as u64,
            format = ?kind,
            "Received object content"
        );
        Ok(value)
    }

    fn read_stream<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        header: &Header,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let started = Instant::now();
        let mut reader = self.content_reader(conn, header)?;
        let bytes = io::copy(&mut reader, sink)?;

        let elapsed = started.elapsed();
        metrics::record_receive(bytes, elapsed);
        tracing::debug!(bytes, elapsed_ms = elapsed.as_millis() as u64, "Received stream content");
        Ok(())
    }

    /// Read a non-structured error body. The first `MAX_ERROR_TEXT` bytes are
    /// kept as text and the remainder is discarded.
    fn read_error_text<C: Connection + ?Sized>(&mut self, conn: &mut C, header: &Header) -> Result<Value> {
        let mut reader = self.content_reader(conn, header)?;
        let mut text = Vec::new();
        (&mut reader).take(MAX_ERROR_TEXT).read_to_end(&mut text)?;
        io::copy(&mut reader, &mut io::sink())?;

        let text = String::from_utf8_lossy(&text).trim().to_string();
        Ok(if text.is_empty() { Value::Null } else { Value::String(text) })
    }

    fn receive_error<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        header: &Header,
        status: StatusCode,
    ) -> Error {
        let mut value = Value::Null;
        let mut details = Value::Null;
        if header.has_content() {
            match ContentKind::from_header(header) {
                Ok(kind) => match self.read_value(conn, header, kind) {
                    Ok(v) => value = v,
                    Err(e) if e.is_io() => {
                        self.set_state(MessageState::Failed);
                        return e;
                    }
                    Err(e) => {
                        tracing::warn!(status = status.as_u16(), error = %e, "Undecodable error body");
                    }
                },
                Err(_) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        content_type = ?header.field("Content-Type"),
                        "Error body is not a structured value"
                    );
                    match self.read_error_text(conn, header) {
                        Ok(text) => details = text,
                        Err(e) => {
                            self.set_state(MessageState::Failed);
                            return e;
                        }
                    }
                }
            }
        }

        let error = if value.is_null() {
            RemoteError {
                kind: "RemoteError".to_string(),
                message: format!(
                    "{} {}",
                    status.as_u16(),
                    header.reason().unwrap_or("Error")
                ),
                details,
            }
        } else {
            RemoteError::from_value(&value)
        };

        self.set_value(value);
        self.set_state(MessageState::Failed);
        Error::Remote {
            status: status.as_u16(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConnection;
    use http::Method;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct Wire {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sender() -> HttpConnection<Wire> {
        HttpConnection::new(Wire { input: Cursor::new(Vec::new()), output: Vec::new() })
    }

    fn receiver(bytes: Vec<u8>) -> HttpConnection<Wire> {
        HttpConnection::new(Wire { input: Cursor::new(bytes), output: Vec::new() })
    }

    /// Shared buffer usable as a `'static` sink.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn response_with_value_goes_chunked() {
        let message = Message::with_value(Value::from(1));
        let mut header = Header::response(StatusCode::OK);
        message.add_custom_headers(&mut header).unwrap();
        assert!(header.is_chunked());

        let mut old = Header::response(StatusCode::OK);
        old.set_version(Version::HTTP_10);
        message.add_custom_headers(&mut old).unwrap();
        assert!(!old.has_field("Transfer-Encoding"));

        let mut sized = Header::response(StatusCode::OK);
        sized.set_field("Content-Length", "1").unwrap();
        message.add_custom_headers(&mut sized).unwrap();
        assert!(!sized.is_chunked());
    }

    #[test]
    fn request_advertises_trailers() {
        let mut message = Message::with_value(Value::Null);
        message.add_header("X-Tag", "a");
        message.add_header("X-Tag", "b");
        message.set_header("Connection", "keep-alive");

        let mut header = Header::request(Method::POST, "/");
        message.add_custom_headers(&mut header).unwrap();
        assert_eq!(header.field("Connection"), Some("keep-alive, TE"));
        assert_eq!(header.field("TE"), Some("trailers, chunked"));
        assert_eq!(header.field_values("X-Tag"), vec!["a", "b"]);
        assert!(header.is_chunked());

        let mut bare = Header::request(Method::POST, "/");
        Message::with_value(Value::Null).add_custom_headers(&mut bare).unwrap();
        assert_eq!(bare.field("Connection"), Some("close, TE"));

        let mut get = Header::request(Method::GET, "/");
        Message::new().add_custom_headers(&mut get).unwrap();
        assert!(!get.has_field("Connection"));
    }

    #[test]
    fn invalid_content_type_fails_before_io() {
        let mut conn = sender();
        let mut message = Message::with_value(Value::from("x"));
        let mut header = Header::response(StatusCode::OK);
        header.set_field("Content-Type", "text/plain").unwrap();
        let err = message.send(&mut conn, &mut header).unwrap_err();
        assert!(matches!(err, Error::InvalidContentType { .. }));
        assert!(conn.get_ref().output.is_empty());
        assert_eq!(message.value(), Some(&Value::from("x")));
    }

    #[test]
    fn value_roundtrip_with_trailer() {
        let value = Value::map([("k", Value::list(vec![Value::from(1), Value::from("two")]))]);
        let mut out = sender();
        let mut message = Message::with_value(value.clone());
        let trailer = Trailer::new();
        trailer.set_field("X-Digest", "d1").unwrap();
        message.set_trailer(trailer);

        let mut header = Header::response(StatusCode::OK);
        header.set_field("Content-Type", "application/json").unwrap();
        message.send(&mut out, &mut header).unwrap();
        assert_eq!(message.state(), MessageState::Complete);

        let mut conn = receiver(out.get_ref().output.clone());
        let received_header = conn.receive_header().unwrap().unwrap();
        let mut incoming = Message::expecting_value();
        incoming.receive_content(&mut conn, &received_header).unwrap();
        assert_eq!(incoming.value(), Some(&value));
        assert_eq!(incoming.trailer().and_then(|t| t.field("x-digest")).as_deref(), Some("d1"));
    }

    #[test]
    fn manual_body_streams_compressed_with_late_trailer() {
        let mut out = sender();
        let mut message = Message::new();
        let mut header = Header::response(StatusCode::OK);
        header.set_field("Transfer-Encoding", "chunked").unwrap();
        header.set_field("Content-Encoding", "gzip").unwrap();
        {
            let mut body = message.send_header(&mut out, &mut header).unwrap();
            body.write_all(b"streamed ").unwrap();
            body.write_all(b"payload").unwrap();
            body.trailer().unwrap().set_field("X-Count", "2").unwrap();
            body.finish().unwrap();
        }
        assert!(message.trailer().unwrap().is_finalized());

        let mut conn = receiver(out.get_ref().output.clone());
        let h = conn.receive_header().unwrap().unwrap();
        let mut incoming = Message::new();
        let mut text = String::new();
        incoming.content_reader(&mut conn, &h).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "streamed payload");
        assert_eq!(incoming.trailer().unwrap().field("X-Count").as_deref(), Some("2"));
    }

    #[test]
    fn sink_closed_only_when_requested() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec();

        let sink = SharedSink::default();
        let mut conn = receiver(wire.clone());
        let h = conn.receive_header().unwrap().unwrap();
        let mut keep = Message::with_sink(sink.clone(), false);
        keep.receive_content(&mut conn, &h).unwrap();
        assert!(keep.has_sink());
        assert_eq!(&*sink.0.lock().unwrap(), b"hello");

        let mut conn = receiver(wire);
        let h = conn.receive_header().unwrap().unwrap();
        let mut close = Message::with_sink(SharedSink::default(), true);
        close.receive_content(&mut conn, &h).unwrap();
        assert!(!close.has_sink());
    }

    #[test]
    fn error_status_never_reaches_sink() {
        let body = br#"{"type":"Err","message":"x"}"#;
        let mut wire = format!(
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        wire.extend_from_slice(body);

        let sink = SharedSink::default();
        let mut conn = receiver(wire);
        let h = conn.receive_header().unwrap().unwrap();
        let mut message = Message::with_sink(sink.clone(), false);
        match message.receive_content(&mut conn, &h) {
            Err(Error::Remote { status, error }) => {
                assert_eq!(status, 404);
                assert_eq!(error.kind, "Err");
                assert_eq!(error.message, "x");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(message.state(), MessageState::Failed);
    }

    #[test]
    fn html_error_body_becomes_generic_remote_error() {
        let wire = b"HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/html\r\nContent-Length: 4\r\n\r\n<p/>".to_vec();
        let mut conn = receiver(wire);
        let h = conn.receive_header().unwrap().unwrap();
        let err = Message::expecting_value().receive_content(&mut conn, &h).unwrap_err();
        match err {
            Error::Remote { status, error } => {
                assert_eq!(status, 503);
                assert_eq!(error.kind, "RemoteError");
                assert!(error.message.contains("Service Unavailable"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn html_error_body_is_consumed_before_next_response() {
        let mut wire = b"HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/html\r\nContent-Length: 13\r\n\r\n<html></html>".to_vec();
        wire.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n42");
        let mut conn = receiver(wire);

        let first = conn.receive_header().unwrap().unwrap();
        match Message::expecting_value().receive_content(&mut conn, &first) {
            Err(Error::Remote { status, error }) => {
                assert_eq!(status, 503);
                assert_eq!(error.details, Value::from("<html></html>"));
            }
            other => panic!("expected remote error, got {:?}", other),
        }

        let second = conn.receive_header().unwrap().unwrap();
        assert_eq!(second.status(), Some(StatusCode::OK));
        let mut message = Message::expecting_value();
        message.receive_content(&mut conn, &second).unwrap();
        assert_eq!(message.value(), Some(&Value::from(42)));
    }

    #[test]
    fn undecodable_body_is_still_consumed() {
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\n{\"a\": ]]]".to_vec();
        wire.extend_from_slice(b"HTTP/1.1 204 No Content\r\n\r\n");
        let mut conn = receiver(wire);

        let first = conn.receive_header().unwrap().unwrap();
        let err = Message::expecting_value().receive_content(&mut conn, &first).unwrap_err();
        assert!(!err.is_io());

        let second = conn.receive_header().unwrap().unwrap();
        assert_eq!(second.status(), Some(StatusCode::NO_CONTENT));
    }

    #[test]
    fn no_content_is_a_noop() {
        let mut conn = receiver(Vec::new());
        let header = Header::request(Method::GET, "/");
        let mut message = Message::expecting_value();
        message.receive_content(&mut conn, &header).unwrap();
        assert_eq!(message.value(), Some(&Value::Null));
        assert_eq!(message.state(), MessageState::Complete);
    }
}
