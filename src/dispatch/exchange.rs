//! One request/response pair as seen by a `WebService`.

use std::io::{self, Read};
use std::net::SocketAddr;

use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;

use crate::error::{Error, Result};
use crate::http::{Connection, Header, Trailer};
use crate::message::codec::form;
use crate::message::content_type::CONTENT_TYPE_JSON;
use crate::message::{Message, OutgoingBody};
use crate::value::Value;

/// Request context handed to [`WebService::service`](crate::registry::WebService::service).
///
/// The request header has already been received; its body has not. The
/// response header starts as `200 OK` with the request's version and the
/// server name, and is sent by one of the `send*` methods.
pub struct Exchange<'c> {
    conn: &'c mut (dyn Connection + 'c),
    request: Header,
    response: Header,
    domain: String,
    mount: String,
    path: String,
    inbound: Message,
    outbound: Message,
    body_consumed: bool,
    response_sent: bool,
}

impl<'c> Exchange<'c> {
    pub(crate) fn new(
        conn: &'c mut (dyn Connection + 'c),
        request: Header,
        response: Header,
        domain: String,
        mount: String,
        path: String,
    ) -> Self {
        let body_consumed = !request.has_content();
        Self {
            conn,
            request,
            response,
            domain,
            mount,
            path,
            inbound: Message::new(),
            outbound: Message::new(),
            body_consumed,
            response_sent: false,
        }
    }

    pub fn request(&self) -> &Header {
        &self.request
    }

    pub fn response(&self) -> &Header {
        &self.response
    }

    /// Response header, editable until the response is sent.
    pub fn response_mut(&mut self) -> &mut Header {
        &mut self.response
    }

    /// Domain the service was found under (`"*"` for the fallback domain).
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Mount path of the service that is answering.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Normalized request path, without query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request path below the mount point (`/` when equal).
    pub fn sub_path(&self) -> &str {
        if self.mount == "/" {
            return &self.path;
        }
        match self.path.strip_prefix(self.mount.as_str()) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }

    /// Raw query string of the request target.
    pub fn query(&self) -> Option<&str> {
        self.request.path().and_then(crate::dispatch::routes::query_of)
    }

    /// Query string decoded as a form value; an empty map without a query.
    pub fn query_value(&self) -> Result<Value> {
        match self.query() {
            Some(q) => form::decode(q.as_bytes()),
            None => Ok(Value::Map(Default::default())),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.conn.is_secure()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }

    /// Receive the request body into `message` (value or sink mode).
    pub fn receive(&mut self, message: &mut Message) -> Result<()> {
        let reads_body = message.has_value() || message.has_sink();
        let result = message.receive_content(&mut *self.conn, &self.request);
        if result.is_ok() && reads_body {
            self.body_consumed = true;
        }
        result
    }

    /// Receive the request body as a structured value.
    pub fn receive_value(&mut self) -> Result<Value> {
        let mut message = Message::expecting_value();
        self.receive(&mut message)?;
        Ok(message.take_value().unwrap_or(Value::Null))
    }

    /// Raw (inflated) request body stream. Reading it to the end lets the
    /// connection be reused.
    pub fn request_body(&mut self) -> Result<Box<dyn Read + '_>> {
        let reader = self.inbound.content_reader(&mut *self.conn, &self.request)?;
        Ok(Box::new(EofFlag {
            inner: reader,
            done: &mut self.body_consumed,
        }))
    }

    /// Trailer received after a chunked request body.
    pub fn request_trailer(&self) -> Option<&Trailer> {
        self.inbound.trailer()
    }

    /// Send the response header and `message`'s content.
    ///
    /// A failure before anything reached the wire, such as
    /// `InvalidContentType`, leaves the response unsent.
    pub fn send(&mut self, message: &mut Message) -> Result<u64> {
        self.ensure_unsent()?;
        let before = message.state();
        let result = message.send(&mut *self.conn, &mut self.response);
        self.response_sent = result.is_ok() || message.state() != before;
        result
    }

    /// Send `value` with `status`, as json unless a Content-Type was set.
    pub fn send_value(&mut self, status: StatusCode, value: Value) -> Result<u64> {
        self.response.set_status(status);
        if !self.response.has_field(CONTENT_TYPE.as_str()) {
            self.response.set_field(CONTENT_TYPE.as_str(), CONTENT_TYPE_JSON)?;
        }
        let mut message = Message::with_value(value);
        self.send(&mut message)
    }

    /// Send `status` with an empty body.
    pub fn send_status(&mut self, status: StatusCode) -> Result<()> {
        self.response.set_status(status);
        if has_body(status) {
            self.response.set_field(CONTENT_LENGTH.as_str(), "0")?;
        }
        let mut message = Message::new();
        self.send(&mut message).map(|_| ())
    }

    /// Send the response header and stream the body by hand.
    pub fn start_response(&mut self) -> Result<OutgoingBody<'_>> {
        self.ensure_unsent()?;
        self.response_sent = true;
        self.outbound.send_header(&mut *self.conn, &mut self.response)
    }

    /// Ask for the connection to close after this response.
    pub fn close_after_response(&mut self) -> Result<()> {
        self.response.set_field(CONNECTION.as_str(), "close")
    }

    pub fn response_sent(&self) -> bool {
        self.response_sent
    }

    /// True once nothing of the request body is left on the wire.
    pub fn body_consumed(&self) -> bool {
        self.body_consumed
    }

    fn ensure_unsent(&self) -> Result<()> {
        if self.response_sent {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "response already sent",
            )));
        }
        Ok(())
    }

    pub(crate) fn into_response(self) -> Header {
        self.response
    }
}

fn has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Marks the request body consumed once the stream reports end of body.
struct EofFlag<'a> {
    inner: Box<dyn Read + 'a>,
    done: &'a mut bool,
}

impl Read for EofFlag<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            *self.done = true;
        }
        Ok(n)
    }
}
