//! Structured-value readers and writers, one pair per wire format.
//!
//! The transport picks a pair from the negotiated `ContentKind`; json and
//! xml stream, form buffers the whole body.

pub mod form;
pub mod json;
pub mod xml;

use std::io::{Read, Write};

use crate::error::Result;
use crate::message::content_type::ContentKind;
use crate::value::Value;

pub use form::FormCodec;
pub use json::JsonCodec;
pub use xml::XmlCodec;

/// Serializes a value onto a byte stream.
pub trait ValueWriter: Send + Sync {
    fn write_value(&self, value: &Value, out: &mut dyn Write) -> Result<()>;
}

/// Deserializes a value from a byte stream.
pub trait ValueReader: Send + Sync {
    fn read_value(&self, input: &mut dyn Read) -> Result<Value>;
}

impl ContentKind {
    pub fn writer(&self) -> &'static dyn ValueWriter {
        match self {
            ContentKind::Json => &JsonCodec,
            ContentKind::Xml => &XmlCodec,
            ContentKind::Form => &FormCodec,
        }
    }

    pub fn reader(&self) -> &'static dyn ValueReader {
        match self {
            ContentKind::Json => &JsonCodec,
            ContentKind::Xml => &XmlCodec,
            ContentKind::Form => &FormCodec,
        }
    }
}

/// Encode into a buffer.
pub fn to_bytes(kind: ContentKind, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    kind.writer().write_value(value, &mut out)?;
    Ok(out)
}

/// Decode from a buffer.
pub fn from_bytes(kind: ContentKind, mut bytes: &[u8]) -> Result<Value> {
    kind.reader().read_value(&mut bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::map([
            ("name", Value::from("widget")),
            ("tags", Value::list(vec![Value::from("a"), Value::from("b")])),
            (
                "owner",
                Value::map([("id", Value::from("42")), ("email", Value::from("x@y.z"))]),
            ),
        ])
    }

    #[test]
    fn every_format_roundtrips_the_same_value() {
        for kind in [ContentKind::Json, ContentKind::Xml, ContentKind::Form] {
            let bytes = to_bytes(kind, &sample()).unwrap();
            assert_eq!(from_bytes(kind, &bytes).unwrap(), sample(), "{:?}", kind);
        }
    }
}
