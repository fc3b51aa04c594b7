//! Message envelope: one content mode, custom headers, optional trailer.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use url::Url;

use crate::error::Result;
use crate::http::{Header, Trailer};
use crate::message::content_type::CONTENT_TYPE_JSON;
use crate::message::state::MessageState;
use crate::value::Value;

pub const USER_AGENT: &str = concat!("service-runtime/", env!("CARGO_PKG_VERSION"));

/// What the message carries. At most one mode is active.
#[derive(Default)]
pub enum Content {
    #[default]
    None,
    /// Bytes to send.
    Source(Box<dyn Read + Send>),
    /// Destination for received bytes. Dropped after receiving when
    /// `close_on_finish` is set.
    Sink {
        sink: Box<dyn Write + Send>,
        close_on_finish: bool,
    },
    /// Structured value to send, or the slot a received value lands in.
    Value(Value),
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::None => f.write_str("None"),
            Content::Source(_) => f.write_str("Source(..)"),
            Content::Sink { close_on_finish, .. } => f
                .debug_struct("Sink")
                .field("close_on_finish", close_on_finish)
                .finish_non_exhaustive(),
            Content::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// A custom header value: one field, or one field occurrence per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomHeader {
    Single(String),
    Multiple(Vec<String>),
}

/// An outgoing or incoming message.
#[derive(Debug, Default)]
pub struct Message {
    content: Content,
    custom_headers: BTreeMap<String, CustomHeader>,
    trailer: Option<Trailer>,
    state: MessageState,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message that sends `value`.
    pub fn with_value(value: Value) -> Self {
        Self {
            content: Content::Value(value),
            ..Self::default()
        }
    }

    /// Message that receives its body as a structured value.
    pub fn expecting_value() -> Self {
        Self::with_value(Value::Null)
    }

    pub fn with_source(source: impl Read + Send + 'static) -> Self {
        let mut message = Self::new();
        message.set_source(source);
        message
    }

    pub fn with_sink(sink: impl Write + Send + 'static, close_on_finish: bool) -> Self {
        let mut message = Self::new();
        message.set_sink(sink, close_on_finish);
        message
    }

    /// Switch to value mode, dropping any source or sink.
    pub fn set_value(&mut self, value: Value) {
        self.content = Content::Value(value);
    }

    /// Switch to source mode, dropping any value or sink.
    pub fn set_source(&mut self, source: impl Read + Send + 'static) {
        self.content = Content::Source(Box::new(source));
    }

    /// Switch to sink mode, dropping any value or source.
    pub fn set_sink(&mut self, sink: impl Write + Send + 'static, close_on_finish: bool) {
        self.content = Content::Sink {
            sink: Box::new(sink),
            close_on_finish,
        };
    }

    pub fn clear_content(&mut self) {
        self.content = Content::None;
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub(crate) fn content_mut(&mut self) -> &mut Content {
        &mut self.content
    }

    pub(crate) fn take_content(&mut self) -> Content {
        std::mem::take(&mut self.content)
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.content {
            Content::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        match &mut self.content {
            Content::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Take the value out, leaving no content.
    pub fn take_value(&mut self) -> Option<Value> {
        match self.take_content() {
            Content::Value(v) => Some(v),
            other => {
                self.content = other;
                None
            }
        }
    }

    pub fn has_value(&self) -> bool {
        matches!(self.content, Content::Value(_))
    }

    pub fn has_source(&self) -> bool {
        matches!(self.content, Content::Source(_))
    }

    pub fn has_sink(&self) -> bool {
        matches!(self.content, Content::Sink { .. })
    }

    /// Replace a custom header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.custom_headers
            .insert(name.into(), CustomHeader::Single(value.into()));
    }

    /// Add another value to a custom header, turning it into a list.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let name = name.into();
        let merged = match self.custom_headers.remove(&name) {
            None => CustomHeader::Single(value),
            Some(CustomHeader::Single(first)) => CustomHeader::Multiple(vec![first, value]),
            Some(CustomHeader::Multiple(mut values)) => {
                values.push(value);
                CustomHeader::Multiple(values)
            }
        };
        self.custom_headers.insert(name, merged);
    }

    pub fn remove_header(&mut self, name: &str) -> Option<CustomHeader> {
        self.custom_headers.remove(name)
    }

    pub fn custom_headers(&self) -> &BTreeMap<String, CustomHeader> {
        &self.custom_headers
    }

    /// Trailer sent after a chunked body, or filled from a received one.
    pub fn set_trailer(&mut self, trailer: Trailer) {
        self.trailer = Some(trailer);
    }

    pub fn trailer(&self) -> Option<&Trailer> {
        self.trailer.as_ref()
    }

    pub(crate) fn trailer_handle(&mut self) -> Trailer {
        self.trailer.get_or_insert_with(Trailer::new).clone()
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: MessageState) {
        self.state = state;
    }

    pub(crate) fn state_mut(&mut self) -> &mut MessageState {
        &mut self.state
    }

    /// Fill the request line and client fields for a request to `url`.
    ///
    /// Accept and Content-Type default to json unless already present; the
    /// Content-Type default applies only when a value is being sent.
    pub fn initialize_request_header(&self, url: &Url, header: &mut Header) -> Result<()> {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        header.set_path(target);
        header.set_version(http::Version::HTTP_11);

        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        header.set_field("Host", authority)?;
        header.set_field("User-Agent", USER_AGENT)?;
        header.set_field("Accept-Encoding", "deflate, gzip")?;

        if !header.has_field("Accept") {
            header.set_field("Accept", CONTENT_TYPE_JSON)?;
        }
        if self.has_value() && !header.has_field("Content-Type") {
            header.set_field("Content-Type", CONTENT_TYPE_JSON)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn content_modes_are_exclusive() {
        let mut message = Message::with_value(Value::from(1));
        message.set_sink(Vec::<u8>::new(), true);
        assert!(message.has_sink() && !message.has_value());
        message.set_source(std::io::empty());
        assert!(message.has_source() && !message.has_sink());
        message.set_value(Value::Null);
        assert!(message.has_value() && !message.has_source());
        assert_eq!(message.take_value(), Some(Value::Null));
        assert!(matches!(message.content(), Content::None));
    }

    #[test]
    fn add_header_accumulates() {
        let mut message = Message::new();
        message.add_header("X-A", "1");
        assert_eq!(message.custom_headers()["X-A"], CustomHeader::Single("1".into()));
        message.add_header("X-A", "2");
        message.add_header("X-A", "3");
        assert_eq!(
            message.custom_headers()["X-A"],
            CustomHeader::Multiple(vec!["1".into(), "2".into(), "3".into()])
        );
    }

    #[test]
    fn request_header_defaults() {
        let url = Url::parse("http://api.example.com:8080/items/7?full=1").unwrap();
        let mut header = Header::request(Method::POST, "/");
        Message::with_value(Value::Null)
            .initialize_request_header(&url, &mut header)
            .unwrap();
        assert_eq!(header.path(), Some("/items/7?full=1"));
        assert_eq!(header.field("Host"), Some("api.example.com:8080"));
        assert_eq!(header.field("Accept-Encoding"), Some("deflate, gzip"));
        assert_eq!(header.field("Accept"), Some("application/json"));
        assert_eq!(header.field("Content-Type"), Some("application/json"));

        let mut get = Header::request(Method::GET, "/");
        get.set_field("Accept", "text/xml").unwrap();
        Message::new()
            .initialize_request_header(&Url::parse("https://h.test/").unwrap(), &mut get)
            .unwrap();
        assert_eq!(get.field("Host"), Some("h.test"));
        assert_eq!(get.field("Accept"), Some("text/xml"));
        assert!(!get.has_field("Content-Type"));
    }
}
