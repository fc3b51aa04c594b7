//! Error taxonomy shared by every subsystem.
//!
//! # Design Decisions
//! - One enum for the whole crate; callers match on variants, not strings
//! - Detection-phase failures never become an `Error` (absorbed in `presentation`)
//! - Every error can be rendered as a structured value so it can travel on the wire

use std::collections::BTreeMap;

use http::StatusCode;
use thiserror::Error;

use crate::registry::SecurityType;
use crate::value::Value;

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// The Content-Type of a structured-value message is not json, xml or form.
    #[error("Unsupported Content-Type for structured value: {content_type:?}")]
    InvalidContentType { content_type: String },

    /// A service already holds the `(domain, security, path)` key.
    #[error("Duplicate service {path} in domain {domain} ({security:?})")]
    DuplicateService {
        domain: String,
        path: String,
        security: SecurityType,
    },

    /// Registration failed; the registry was left untouched.
    #[error("Could not add web service {path}: {source}")]
    AddServiceFailure {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// A service's initialize hook failed.
    #[error("Service {path} failed to initialize: {reason}")]
    InitFailed { path: String, reason: String },

    /// Underlying read/write/connect failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with an error status.
    #[error("Remote error ({status}): {error}")]
    Remote { status: u16, error: RemoteError },

    /// A structured value could not be read or written.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A message header could not be parsed or built.
    #[error("Bad header: {0}")]
    BadHeader(String),

    /// The trailer was already flushed to the wire.
    #[error("Trailer already finalized")]
    TrailerFinalized,

    /// Invalid runtime configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS context could not be built.
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    pub fn bad_header(msg: impl Into<String>) -> Self {
        Error::BadHeader(msg.into())
    }

    /// Stable type identifier used in structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidContentType { .. } => "InvalidContentType",
            Error::DuplicateService { .. } => "DuplicateService",
            Error::AddServiceFailure { .. } => "AddServiceFailure",
            Error::InitFailed { .. } => "InitFailed",
            Error::Io(_) => "IOFailure",
            Error::Remote { .. } => "RemoteError",
            Error::Codec(_) => "CodecError",
            Error::BadHeader(_) => "BadHeader",
            Error::TrailerFinalized => "TrailerFinalized",
            Error::Config(_) => "ConfigError",
            Error::Tls(_) => "TlsError",
        }
    }

    /// HTTP status used when this error answers a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidContentType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Codec(_) | Error::BadHeader(_) => StatusCode::BAD_REQUEST,
            Error::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for failures of the underlying transport.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Render as `{"type", "message", "details"}`.
    pub fn to_value(&self) -> Value {
        if let Error::Remote { error, .. } = self {
            return error.to_value();
        }

        let mut details = BTreeMap::new();
        match self {
            Error::InvalidContentType { content_type } => {
                details.insert("contentType".to_string(), Value::from(content_type.as_str()));
            }
            Error::DuplicateService { domain, path, .. } => {
                details.insert("domain".to_string(), Value::from(domain.as_str()));
                details.insert("path".to_string(), Value::from(path.as_str()));
            }
            Error::AddServiceFailure { path, source } => {
                details.insert("path".to_string(), Value::from(path.as_str()));
                details.insert("cause".to_string(), source.to_value());
            }
            _ => {}
        }

        RemoteError {
            kind: self.kind().to_string(),
            message: self.to_string(),
            details: Value::Map(details),
        }
        .to_value()
    }
}

/// Structured error decoded from a peer's error body.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    pub details: Value,
}

impl RemoteError {
    /// Build from a received body. Unknown shapes keep the whole body in `details`.
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match (field("type"), field("message")) {
            (Some(kind), message) => Self {
                kind,
                message: message.unwrap_or_default(),
                details: value.get("details").cloned().unwrap_or(Value::Null),
            },
            (None, message) => Self {
                kind: "RemoteError".to_string(),
                message: message.unwrap_or_else(|| "Remote peer reported an error".to_string()),
                details: value.clone(),
            },
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::from(self.kind.as_str()));
        map.insert("message".to_string(), Value::from(self.message.as_str()));
        if !self.details.is_null() {
            map.insert("details".to_string(), self.details.clone());
        }
        Value::Map(map)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
