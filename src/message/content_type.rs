//! Content negotiation: which structured format and which compression a
//! header declares.
//!
//! Both are substring matches on the raw field value, so parameters such as
//! `charset` are ignored.

use crate::error::{Error, Result};
use crate::http::Header;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "text/xml";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Wire format of a structured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Xml,
    Form,
}

impl ContentKind {
    /// Classify a Content-Type value. Json wins over xml, xml over form.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let lower = value.to_ascii_lowercase();
        if lower.contains(CONTENT_TYPE_JSON) {
            Some(ContentKind::Json)
        } else if lower.contains("xml") {
            Some(ContentKind::Xml)
        } else if lower.contains(CONTENT_TYPE_FORM) {
            Some(ContentKind::Form)
        } else {
            None
        }
    }

    /// Classify a header's Content-Type, failing with `InvalidContentType`.
    pub fn from_header(header: &Header) -> Result<Self> {
        let value = header.field("Content-Type").unwrap_or("");
        Self::from_content_type(value).ok_or_else(|| Error::InvalidContentType {
            content_type: value.to_string(),
        })
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Json => CONTENT_TYPE_JSON,
            ContentKind::Xml => CONTENT_TYPE_XML,
            ContentKind::Form => CONTENT_TYPE_FORM,
        }
    }
}

/// Supported Content-Encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// zlib framing.
    Deflate,
    Gzip,
}

impl ContentEncoding {
    pub fn from_header(header: &Header) -> Option<Self> {
        let value = header.field("Content-Encoding")?.to_ascii_lowercase();
        if value.contains("deflate") {
            Some(ContentEncoding::Deflate)
        } else if value.contains("gzip") {
            Some(ContentEncoding::Gzip)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Gzip => "gzip",
        }
    }
}
