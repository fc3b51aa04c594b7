//! JSON via `serde_json`, using the value's serde impls.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::message::codec::{ValueReader, ValueWriter};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

fn map_err(e: serde_json::Error) -> Error {
    if e.is_io() {
        Error::Io(io::Error::from(e))
    } else {
        Error::codec(format!("json: {}", e))
    }
}

impl ValueWriter for JsonCodec {
    fn write_value(&self, value: &Value, out: &mut dyn Write) -> Result<()> {
        serde_json::to_writer(out, value).map_err(map_err)
    }
}

impl ValueReader for JsonCodec {
    fn read_value(&self, input: &mut dyn Read) -> Result<Value> {
        serde_json::from_reader(input).map_err(map_err)
    }
}
