//! Message header model.
//!
//! # Responsibilities
//! - Hold the request line or status line plus header fields
//! - Answer the framing questions the transport asks (length, chunked, has content)

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, StatusCode, Version};

use crate::error::{Error, Result};

/// First line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request {
        method: Method,
        path: String,
        version: Version,
    },
    Response {
        version: Version,
        status: StatusCode,
        reason: Option<String>,
    },
}

/// A request or response header.
#[derive(Debug, Clone)]
pub struct Header {
    start: StartLine,
    fields: HeaderMap,
}

impl Header {
    pub fn request(method: Method, path: impl Into<String>) -> Self {
        Self {
            start: StartLine::Request {
                method,
                path: path.into(),
                version: Version::HTTP_11,
            },
            fields: HeaderMap::new(),
        }
    }

    pub fn response(status: StatusCode) -> Self {
        Self {
            start: StartLine::Response {
                version: Version::HTTP_11,
                status,
                reason: None,
            },
            fields: HeaderMap::new(),
        }
    }

    pub fn from_parts(start: StartLine, fields: HeaderMap) -> Self {
        Self { start, fields }
    }

    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.start, StartLine::Response { .. })
    }

    pub fn version(&self) -> Version {
        match &self.start {
            StartLine::Request { version, .. } | StartLine::Response { version, .. } => *version,
        }
    }

    pub fn set_version(&mut self, v: Version) {
        match &mut self.start {
            StartLine::Request { version, .. } | StartLine::Response { version, .. } => *version = v,
        }
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Request target including any query string.
    pub fn path(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { path, .. } => Some(path),
            StartLine::Response { .. } => None,
        }
    }

    pub fn set_path(&mut self, p: impl Into<String>) {
        if let StartLine::Request { path, .. } = &mut self.start {
            *path = p.into();
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// Set the status and clear any custom reason phrase.
    pub fn set_status(&mut self, s: StatusCode) {
        if let StartLine::Response { status, reason, .. } = &mut self.start {
            *status = s;
            *reason = None;
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.start {
            StartLine::Response { status, reason, .. } => {
                reason.as_deref().or_else(|| status.canonical_reason())
            }
            StartLine::Request { .. } => None,
        }
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut HeaderMap {
        &mut self.fields
    }

    /// First value of a field, if present and textual.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn field_values(&self, name: &str) -> Vec<&str> {
        self.fields
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Replace every occurrence of a field.
    pub fn set_field(&mut self, name: &str, value: impl AsRef<str>) -> Result<()> {
        let (name, value) = field_pair(name, value.as_ref())?;
        self.fields.insert(name, value);
        Ok(())
    }

    /// Add another occurrence of a field.
    pub fn add_field(&mut self, name: &str, value: impl AsRef<str>) -> Result<()> {
        let (name, value) = field_pair(name, value.as_ref())?;
        self.fields.append(name, value);
        Ok(())
    }

    pub fn remove_field(&mut self, name: &str) {
        self.fields.remove(name);
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    pub fn content_length(&self) -> Option<u64> {
        self.field(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// True when the last transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.field_values(TRANSFER_ENCODING.as_str())
            .last()
            .map(|v| {
                v.rsplit(',')
                    .next()
                    .map(|c| c.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Whether a body follows this header.
    ///
    /// Responses without framing fields carry a body until the connection
    /// closes, unless the status forbids one.
    pub fn has_content(&self) -> bool {
        if self.has_field(TRANSFER_ENCODING.as_str()) {
            return true;
        }
        if let Some(len) = self.content_length() {
            return len > 0;
        }
        match &self.start {
            StartLine::Request { .. } => false,
            StartLine::Response { status, .. } => {
                !(status.is_informational()
                    || *status == StatusCode::NO_CONTENT
                    || *status == StatusCode::NOT_MODIFIED)
            }
        }
    }
}

fn field_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::bad_header(format!("invalid field name {:?}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| Error::bad_header(format!("invalid value for {}: {}", name, e)))?;
    Ok((name, value))
}

/// `HTTP/1.1` style text for a version.
pub fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
